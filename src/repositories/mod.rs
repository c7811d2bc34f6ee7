pub(crate) mod assessments;
pub(crate) mod submissions;
