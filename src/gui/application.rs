use iced::{Alignment, Application, Command, Element, Length, Settings, Size, Subscription, window};
use iced::event::{self, Event};
use iced::time::every as iced_time_every;
use iced::theme::Theme;
use iced::widget::{
    PickList, button, checkbox, column, container, horizontal_rule, row, text, text_input,
};
use std::time::{Duration, Instant};
use log::{error, info, warn};

use crate::config::io::ConfigIO;
use crate::config::types::Config;
use crate::device::constants::{CURRENT_MAX, VOLTAGE_MAX};
use crate::device::session::{scan_ports, SerialSession};
use crate::device::status::StatusSnapshot;
use crate::error::{AppRunError, DeviceError};
use crate::gui::graph::readback_graph;
use crate::gui::history::ScrollingBuffer;
use crate::gui::types::Message;
use crate::Cli;

/// The channel the panel controls. The KA3005P is a single-channel supply;
/// the protocol itself addresses up to two.
const CHANNEL: u8 = 1;

/// Readback samples kept for the graphs. At the default poll interval this
/// covers several minutes, well past the 30 s shown on screen.
const HISTORY_SAMPLES: usize = 480;

pub struct ApplicationFlags {
    config_io: ConfigIO,
    port_override: Option<String>,
    baud_override: Option<u32>,
}

pub struct KoradApplication {
    // messages that the user must click away
    notices: Vec<String>,

    // current config, might not be saved to disk yet
    config_io: ConfigIO,
    config: Config,
    config_dirty: bool,
    // this flag is used to make sure that a user is not spammed with save configuration errors
    displayed_config_save_error: bool,

    // CLI overrides, applied on top of the loaded config
    port_override: Option<String>,
    baud_override: Option<u32>,

    // connection state
    ports: Vec<String>,
    selected_port: Option<String>,
    session: Option<SerialSession>,

    // set-point fields as the user typed them, committed on Apply, or on
    // every edit while auto-apply is on
    voltage_input: String,
    current_input: String,
    auto_set: bool,

    // readback history for the graphs, timestamped from connected_at
    voltage_history: ScrollingBuffer,
    current_history: ScrollingBuffer,
    connected_at: Option<Instant>,

    // transient message shown inline, replaced by the next action
    last_error: Option<String>,
}

impl KoradApplication {
    fn load_config(&self) -> Command<Message> {
        let config_io = self.config_io.clone();

        let fut = async move {
            match config_io.read().await {
                Ok(config) => (config, None),
                Err(err) => {
                    let mut error_message: Option<String> = None;

                    if err.is_file_not_found_error() {
                        // this is probably the first start of the app
                        info!("Config file not found, using defaults");
                    } else {
                        error!("Failed to load config: {:?}", &err);
                        error_message = Some(format!("Failed to load config: {}", &err));
                    }
                    (Config::default(), error_message)
                },
            }
        };

        Command::perform(fut, Message::ConfigLoadComplete)
    }

    fn save_config(&self) -> Command<Message> {
        let config = self.config.clone();
        let config_io = self.config_io.clone();

        let fut = async move {
            match config_io.save(config).await {
                Ok(_) => None,
                Err(err) => {
                    error!("Failed to save config: {:?}", &err);
                    Some(format!("Failed to save config: {}", &err))
                },
            }
        };

        Command::perform(fut, Message::ConfigSaveComplete)
    }

    fn refresh_ports(&mut self) {
        self.ports = scan_ports();

        // keep a remembered or overridden port selectable even while the
        // device is unplugged
        if let Some(port) = &self.selected_port {
            if !self.ports.contains(port) {
                self.ports.push(port.clone());
            }
        }

        if self.selected_port.is_none() {
            self.selected_port = self.ports.first().cloned();
        }
    }

    fn baud(&self) -> u32 {
        self.baud_override.unwrap_or(self.config.baud)
    }

    fn report_device_error(&mut self, what: &'static str, err: DeviceError) {
        warn!("{}: {:?}", what, &err);
        self.last_error = Some(format!("{}: {}", what, err));

        if err.is_disconnection() {
            if let Some(mut session) = self.session.take() {
                session.disconnect();
            }
        }
    }

    fn connect(&mut self) {
        let Some(port) = self.selected_port.clone() else {
            self.last_error = Some("No serial port selected".to_string());
            return;
        };

        match SerialSession::connect(&port, self.baud()) {
            Ok(mut session) => {
                // take over the panel; seed the inputs from whatever the
                // device is already programmed to
                if let Err(err) = session.set_lock(true) {
                    warn!("Failed to lock front panel: {:?}", err);
                }
                match session.read_setpoints(CHANNEL) {
                    Ok((volts, amps)) => {
                        self.voltage_input = format!("{:.2}", volts);
                        self.current_input = format!("{:.3}", amps);
                    },
                    Err(err) => warn!("Failed to read set-points: {:?}", err),
                }

                self.session = Some(session);
                self.last_error = None;
                self.voltage_history.clear();
                self.current_history.clear();
                self.connected_at = Some(Instant::now());

                if self.config.port.as_deref() != Some(port.as_str()) {
                    self.config.port = Some(port);
                    self.config_dirty = true;
                }
            },
            Err(err) => self.report_device_error("Failed to connect", err),
        }
    }

    fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            // leave the supply in a safe state, best effort
            if let Err(err) = session.set_output(false) {
                warn!("Failed to switch output off: {:?}", err);
            }
            if let Err(err) = session.set_lock(false) {
                warn!("Failed to unlock front panel: {:?}", err);
            }
            session.disconnect();
        }

        self.connected_at = None;
        self.last_error = None;
    }

    fn apply_setpoints(&mut self) {
        let Ok(volts) = self.voltage_input.trim().parse::<f64>() else {
            self.last_error = Some(format!("Voltage {:?} is not a number", self.voltage_input));
            return;
        };
        let Ok(amps) = self.current_input.trim().parse::<f64>() else {
            self.last_error = Some(format!("Current {:?} is not a number", self.current_input));
            return;
        };

        self.commit_setpoints(volts, amps);
    }

    fn auto_apply(&mut self) {
        if !self.auto_set {
            return;
        }

        // half-typed fields are left alone until they parse
        let (Ok(volts), Ok(amps)) = (
            self.voltage_input.trim().parse::<f64>(),
            self.current_input.trim().parse::<f64>(),
        ) else {
            return;
        };

        self.commit_setpoints(volts, amps);
    }

    fn commit_setpoints(&mut self, volts: f64, amps: f64) {
        let Some(session) = self.session.as_mut() else { return };

        match session.set_setpoints(CHANNEL, volts, amps) {
            Ok(_) => self.last_error = None,
            Err(err) => self.report_device_error("Failed to apply set-points", err),
        }
    }

    fn record_sample(&mut self, snapshot: &StatusSnapshot) {
        let Some(connected_at) = self.connected_at else { return };
        let timestamp = connected_at.elapsed().as_secs_f32();

        self.voltage_history.append(timestamp, snapshot.voltage as f32);
        self.current_history.append(timestamp, snapshot.current as f32);
    }

    fn snapshot(&self) -> Option<&StatusSnapshot> {
        self.session.as_ref().and_then(|session| session.last_status())
    }

    fn before_close(&mut self) {
        self.disconnect();
    }
}

impl Application for KoradApplication {
    type Executor = iced::executor::Default;
    type Message = Message;
    type Theme = Theme;
    type Flags = ApplicationFlags;

    fn new(flags: ApplicationFlags) -> (KoradApplication, Command<Self::Message>) {
        let mut app = KoradApplication {
            notices: Vec::new(),
            config_io: flags.config_io,
            config: Config::default(),
            config_dirty: false,
            displayed_config_save_error: false,
            port_override: flags.port_override,
            baud_override: flags.baud_override,
            ports: Vec::new(),
            selected_port: None,
            session: None,
            voltage_input: "0.00".to_string(),
            current_input: "0.000".to_string(),
            auto_set: false,
            voltage_history: ScrollingBuffer::new(HISTORY_SAMPLES),
            current_history: ScrollingBuffer::new(HISTORY_SAMPLES),
            connected_at: None,
            last_error: None,
        };

        app.selected_port = app.port_override.clone();
        app.refresh_ports();

        let command = app.load_config();
        (app, command)
    }

    fn title(&self) -> String {
        String::from(concat!("Korad Control ", env!("CARGO_PKG_VERSION")))
    }

    fn update(&mut self, message: Message) -> Command<Self::Message> {
        match message {
            Message::ConfigLoadComplete((config, error_message)) => {
                info!("Config load complete");
                self.config = config;
                if let Some(error_message) = error_message {
                    self.notices.push(error_message);
                }

                // the CLI override wins over the remembered port
                if self.port_override.is_none() {
                    if let Some(port) = self.config.port.clone() {
                        self.selected_port = Some(port);
                    }
                }
                self.refresh_ports();
            },
            Message::ApplyDirtyConfig => {
                if self.config_dirty {
                    self.config_dirty = false;
                    return self.save_config();
                }
            },
            Message::ConfigSaveComplete(error_message) => {
                if !self.displayed_config_save_error {
                    if let Some(error_message) = error_message {
                        self.displayed_config_save_error = true;
                        self.notices.push(error_message);
                    }
                }
            },
            Message::NoticeConfirmed => {
                if !self.notices.is_empty() {
                    self.notices.remove(0);
                }
            },
            Message::EventOccurred(Event::Window(id, window::Event::CloseRequested)) => {
                info!("Close requested");
                self.before_close();
                return window::close(id);
            },

            Message::RefreshPorts => {
                self.refresh_ports();
            },
            Message::PortSelected(port) => {
                self.selected_port = Some(port);
            },
            Message::ConnectPressed => {
                if self.session.is_none() {
                    self.connect();
                }
            },
            Message::DisconnectPressed => {
                self.disconnect();
            },

            Message::VoltageInputChanged(value) => {
                self.voltage_input = value;
                self.auto_apply();
            },
            Message::CurrentInputChanged(value) => {
                self.current_input = value;
                self.auto_apply();
            },
            Message::ApplySetPoints => {
                self.apply_setpoints();
            },
            Message::AutoApplyToggled(on) => {
                self.auto_set = on;
                // switching it on commits whatever is in the fields right away
                self.auto_apply();
            },
            Message::ToggleOutput => {
                let on = self.snapshot().map(|snapshot| snapshot.output).unwrap_or(false);
                if let Some(session) = self.session.as_mut() {
                    if let Err(err) = session.set_output(!on) {
                        self.report_device_error("Failed to toggle output", err);
                    }
                }
            },
            Message::ToggleOcp => {
                let on = self.snapshot().map(|snapshot| snapshot.ocp).unwrap_or(false);
                if let Some(session) = self.session.as_mut() {
                    if let Err(err) = session.set_ocp(!on) {
                        self.report_device_error("Failed to toggle OCP", err);
                    }
                }
            },
            Message::ToggleOvp => {
                let on = self.snapshot().map(|snapshot| snapshot.ovp).unwrap_or(false);
                if let Some(session) = self.session.as_mut() {
                    if let Err(err) = session.set_ovp(!on) {
                        self.report_device_error("Failed to toggle OVP", err);
                    }
                }
            },

            Message::PollTick => {
                if let Some(session) = self.session.as_mut() {
                    match session.poll_status(CHANNEL) {
                        Ok(snapshot) => {
                            self.last_error = None;
                            self.record_sample(&snapshot);
                        },
                        Err(err) => {
                            self.report_device_error("Poll failed", err);
                        },
                    }
                }
            },

            _ => {},
        }

        Command::none()
    }

    fn subscription(&self) -> Subscription<Message> {
        let mut subscriptions = vec![
            event::listen().map(Message::EventOccurred),
            iced_time_every(Duration::from_secs(1)).map(|_| Message::ApplyDirtyConfig),
        ];

        // status polling runs on the same loop as everything else; each tick
        // performs one blocking serial round-trip
        if self.session.is_some() {
            subscriptions.push(
                iced_time_every(Duration::from_millis(self.config.poll_interval_ms.max(100)))
                    .map(|_| Message::PollTick),
            );
        }

        Subscription::batch(subscriptions)
    }

    fn view(&self) -> Element<Message> {
        if let Some(notice) = self.notices.first() {
            return container(
                column![
                    text(notice),

                    button(text("Okay"))
                        .on_press(Message::NoticeConfirmed),

                ].align_items(Alignment::Center).spacing(20),
            )
            .width(Length::Fill)
            .padding(20)
            .into();
        }

        let connected = self.session.is_some();

        let connection_row = {
            let port_list = PickList::new(
                self.ports.clone(),
                self.selected_port.clone(),
                Message::PortSelected,
            )
            .placeholder("no port")
            .width(220);

            let mut rescan = button(text("Rescan"));
            if !connected {
                rescan = rescan.on_press(Message::RefreshPorts);
            }

            let toggle = if connected {
                button(text("Disconnect")).on_press(Message::DisconnectPressed)
            } else {
                let mut connect = button(text("Connect"));
                if self.selected_port.is_some() {
                    connect = connect.on_press(Message::ConnectPressed);
                }
                connect
            };

            row![port_list, rescan, toggle]
                .align_items(Alignment::Center)
                .spacing(10)
        };

        let model_line = match self.session.as_ref().and_then(|session| session.model()) {
            Some(model) => format!("Connected: {}", model),
            None => format!("Not connected ({} baud)", self.baud()),
        };

        let setpoint_row = {
            let mut apply = button(text("Apply"));
            if connected {
                apply = apply.on_press(Message::ApplySetPoints);
            }

            row![
                text_input("0.00", &self.voltage_input)
                    .width(80)
                    .on_input(Message::VoltageInputChanged),
                text(format!("V (max {})", VOLTAGE_MAX)),

                text_input("0.000", &self.current_input)
                    .width(80)
                    .on_input(Message::CurrentInputChanged),
                text(format!("A (max {})", CURRENT_MAX)),

                apply,
                checkbox("AUTO", self.auto_set).on_toggle(Message::AutoApplyToggled),
            ]
            .align_items(Alignment::Center)
            .spacing(10)
        };

        let toggle_row = {
            let toggle = |label: String, on_press: Message| {
                let mut toggle = button(text(label));
                if connected {
                    toggle = toggle.on_press(on_press);
                }
                toggle
            };

            let snapshot = self.snapshot();
            let output_on = snapshot.map(|s| s.output).unwrap_or(false);
            let ocp_on = snapshot.map(|s| s.ocp).unwrap_or(false);
            let ovp_on = snapshot.map(|s| s.ovp).unwrap_or(false);

            row![
                toggle(
                    format!("Output {}", if output_on { "ON" } else { "OFF" }),
                    Message::ToggleOutput,
                ),
                toggle(format!("OCP {}", if ocp_on { "on" } else { "off" }), Message::ToggleOcp),
                toggle(format!("OVP {}", if ovp_on { "on" } else { "off" }), Message::ToggleOvp),
            ]
            .align_items(Alignment::Center)
            .spacing(10)
        };

        let readback = match self.snapshot() {
            Some(snapshot) => {
                let stale = self
                    .session
                    .as_ref()
                    .map(|session| session.is_stale())
                    .unwrap_or(false);

                format!(
                    "{:05.2} V   {:05.3} A   {}{}",
                    snapshot.voltage,
                    snapshot.current,
                    snapshot.mode,
                    if stale { "   (stale)" } else { "" },
                )
            },
            None => "--.-- V   -.--- A".to_string(),
        };

        let mut content = column![
            connection_row,
            text(model_line).size(14),
        ]
        .spacing(20)
        .width(Length::Fill)
        .align_items(Alignment::Center);

        if let Some(message) = &self.last_error {
            content = content.push(text(message).size(14));
        }

        content = content.push(horizontal_rule(10));
        content = content.push(setpoint_row);
        content = content.push(toggle_row);
        content = content.push(text(readback).size(40));

        if connected {
            let now = self
                .connected_at
                .map(|connected_at| connected_at.elapsed().as_secs_f32())
                .unwrap_or(0.0);
            let voltage_setpoint =
                self.voltage_input.trim().parse::<f64>().unwrap_or(VOLTAGE_MAX);
            let current_setpoint =
                self.current_input.trim().parse::<f64>().unwrap_or(CURRENT_MAX);

            let graph_row = row![
                column![
                    text("Voltage").size(14),
                    readback_graph(&self.voltage_history, voltage_setpoint, now),
                ]
                .spacing(5)
                .width(Length::Fill)
                .height(Length::Fill),
                column![
                    text("Current").size(14),
                    readback_graph(&self.current_history, current_setpoint, now),
                ]
                .spacing(5)
                .width(Length::Fill)
                .height(Length::Fill),
            ]
            .spacing(20)
            .width(Length::Fill)
            .height(Length::Fill);

            content = content.push(graph_row);
        }

        container(content)
            .width(Length::Fill)
            .padding(20)
            .into()
    }
}

pub fn run_application(cli: Cli) -> Result<(), AppRunError> {
    let mut config_io = ConfigIO::new_sync()?;
    let mut config_locker = config_io.locker()?;
    let _lock_guard = config_locker.lock()?;

    let flags = ApplicationFlags {
        config_io,
        port_override: cli.port,
        baud_override: cli.baud,
    };
    let mut settings = Settings::with_flags(flags);

    // handle exits ourselves (Event::CloseRequested) so the device is left
    // in a safe state first
    settings.id = Some("korad-control".to_string());
    settings.window.exit_on_close_request = false;
    settings.window.size = Size::new(800.0, 550.0);
    settings.window.resizable = false;

    // this function will call process::exit() unless there was a startup error
    KoradApplication::run(settings)?;
    Ok(())
}
