pub(crate) mod expiry_sweep;
pub(crate) mod handoff_redrive;
pub(crate) mod scheduler;
