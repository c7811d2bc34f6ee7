pub(crate) mod evaluation_handoff;
pub(crate) mod session_lifecycle;
