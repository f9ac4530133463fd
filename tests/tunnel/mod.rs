//! Tunnel saga scenarios driven by the scripted doubles in
//! `vorota::test_support`.

mod compensation;
mod provisioning;
mod teardown;
mod test_helpers;
