use iced::Event;

use crate::config::types::Config;

#[derive(Debug, Clone)]
pub enum Message {
    EventOccurred(Event),
    ConfigLoadComplete((Config, Option<String>)),
    ApplyDirtyConfig,
    ConfigSaveComplete(Option<String>),
    NoticeConfirmed,

    RefreshPorts,
    PortSelected(String),
    ConnectPressed,
    DisconnectPressed,

    VoltageInputChanged(String),
    CurrentInputChanged(String),
    ApplySetPoints,
    AutoApplyToggled(bool),
    ToggleOutput,
    ToggleOcp,
    ToggleOvp,

    PollTick,
}
