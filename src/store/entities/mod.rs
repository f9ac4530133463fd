pub(crate) mod audit_event;
pub(crate) mod provisioning_log;
pub(crate) mod tunnel_record;
