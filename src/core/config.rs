mod parsing;
mod settings;
mod types;

pub(crate) use types::{
    HandoffMode, HandoffSettings, ResilienceSettings, Settings, StoreBackend, SweepMode,
    SweepSettings,
};
