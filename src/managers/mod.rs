pub mod controller;
pub mod events;
pub mod logging;
pub mod provisioner;
pub mod session;
pub mod status;
