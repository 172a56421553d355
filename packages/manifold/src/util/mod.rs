pub(crate) mod abort_on_drop;
pub(crate) mod event;
