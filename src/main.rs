use std::sync::mpsc::{channel, Receiver as StdReceiver};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use clap::Parser;
use eframe::egui;
use tokio::spawn;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bthealth::ble::BtleplugTransport;
use bthealth::config::Args;
use bthealth::fake::{transmit_fake_readings, FakeTransport};
use bthealth::profile::{self, ProfileId, CATALOG};
use bthealth::{SessionEvent, SessionManager, SessionState, StartError, Subscription, Transport};

mod signal;
mod widget;

use signal::{GuiSignal, SessionSignal, SessionView};

const MAX_FPS: f64 = 30.0;
const FAKE_READING_INTERVAL: Duration = Duration::from_millis(800);


#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    // Capability check: without a transport no session can ever start.
    let transport = open_transport(&args).await;

    if args.headless {
        let Some(transport) = transport else { bail!("Bluetooth unsupported: no adapter available"); };
        let Some(profile_id) = args.profile else { bail!("--headless needs --profile"); };
        let manager = SessionManager::new(transport, args.session_config());
        return run_headless(manager, profile_id).await;
    }

    let manager = transport.map(|transport| SessionManager::new(transport, args.session_config()));
    let (tx_to_gui, rx_to_gui) = channel();
    let (tx_from_gui, rx_from_gui) = unbounded_channel();

    let subscription = manager.as_ref().map(|manager| {
        manager.subscribe_events(move |event| {
            let _ = tx_to_gui.send(SessionSignal::from(event));
        })
    });

    if let Some(manager) = manager.clone() {
        if let Some(profile_id) = args.profile {
            let _ = tx_from_gui.send(GuiSignal::StartSession(profile_id));
        }
        spawn(handle_gui_signals(manager, rx_from_gui));
    }

    let supported = manager.is_some();
    let native_options = eframe::NativeOptions::default();
    eframe::run_native(
        "bthealth",
        native_options,
        Box::new(move |cc| {
            Ok(Box::new(HealthApp::new(cc, rx_to_gui, tx_from_gui, supported, subscription)))
        }),
    )
    .map_err(|err| anyhow!("{err}"))
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

async fn open_transport(args: &Args) -> Option<Arc<dyn Transport>> {
    if args.simulate {
        let transport = FakeTransport::simulated();
        spawn(transmit_fake_readings(transport.clone(), FAKE_READING_INTERVAL));
        return Some(Arc::new(transport));
    }

    match BtleplugTransport::new().await {
        Ok(transport) => Some(Arc::new(transport)),
        Err(err) => {
            warn!(%err, "Bluetooth unsupported");
            None
        }
    }
}

async fn handle_gui_signals(manager: SessionManager, mut rx_from_gui: UnboundedReceiver<GuiSignal>) {
    while let Some(signal) = rx_from_gui.recv().await {
        match signal {
            // Started on its own task so a stop can arrive during discovery.
            GuiSignal::StartSession(profile_id) => {
                let manager = manager.clone();
                spawn(async move {
                    if let Err(err) = manager.start(*profile::by_id(profile_id)).await {
                        warn!(%err, "session did not start");
                    }
                });
            }
            GuiSignal::StopSession => manager.stop().await,
        }
    }
}

async fn run_headless(manager: SessionManager, profile_id: ProfileId) -> Result<()> {
    let (tx, mut rx) = unbounded_channel();
    let _subscription = manager.subscribe_events(move |event| {
        let _ = tx.send(event.clone());
    });

    let starting = manager.clone();
    let start = spawn(async move { starting.start(*profile::by_id(profile_id)).await });

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, stopping session");
                manager.stop().await;
                break;
            }
            Some(event) = rx.recv() => {
                match &event {
                    SessionEvent::Reading(reading) => println!("{}: {}", reading.profile_label, reading.rendered),
                    SessionEvent::DecodeFailed { error, .. } => println!("bad frame: {error}"),
                    SessionEvent::ServiceProbe(probe) => println!("{}", signal::describe_probe(probe)),
                    SessionEvent::StateChanged(change) => {
                        if let Some(notice) = &change.notice {
                            println!("{notice}");
                        }
                        if change.state.is_terminal() {
                            break;
                        }
                    }
                }
            }
        }
    }

    match start.await? {
        Ok(()) | Err(StartError::Stopped | StartError::PeerDisconnected) => Ok(()),
        Err(err) => Err(err.into()),
    }
}


struct HealthApp {
    rx_from_core: StdReceiver<SessionSignal>,
    tx_from_gui: UnboundedSender<GuiSignal>,
    supported: bool,
    _subscription: Option<Subscription>,
    view: SessionView,
    frame_time: Duration,
}

impl HealthApp {
    fn new(
        _cc: &eframe::CreationContext<'_>,
        rx_from_core: StdReceiver<SessionSignal>,
        tx_from_gui: UnboundedSender<GuiSignal>,
        supported: bool,
        subscription: Option<Subscription>,
    ) -> Self {
        HealthApp {
            rx_from_core,
            tx_from_gui,
            supported,
            _subscription: subscription,
            view: SessionView::default(),
            frame_time: Duration::from_secs_f64(1.0 / MAX_FPS),
        }
    }

    fn read_channel(&mut self) {
        while let Ok(signal) = self.rx_from_core.try_recv() {
            self.view.apply(signal);
        }
    }
}

fn state_text(state: &SessionState) -> &'static str {
    match state {
        SessionState::Idle => "idle",
        SessionState::Discovering => "searching",
        SessionState::Connected => "connected",
        SessionState::Subscribed => "receiving",
        SessionState::Closed => "closed",
        SessionState::Failed(_) => "failed",
    }
}

impl eframe::App for HealthApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.read_channel();

        egui::CentralPanel::default().show(ctx, |ui| {
            if !self.supported {
                ui.add(widget::get_unsupported_label());
                return;
            }

            let view = &self.view;
            if view.is_open() {
                let profile = view.profile.unwrap_or_default();
                ui.add(widget::get_active_session_label(profile, state_text(&view.state)));
                if let Some(value) = &view.value {
                    ui.add(widget::get_reading_label(profile, value));
                }
                if ui.add(widget::get_stop_session_button(profile)).clicked() {
                    let _ = self.tx_from_gui.send(GuiSignal::StopSession);
                }
            } else {
                for profile in CATALOG {
                    if ui.add(widget::get_profile_button(profile.label)).clicked() {
                        let _ = self.tx_from_gui.send(GuiSignal::StartSession(profile.id));
                    }
                }
            }

            if let Some(notice) = &view.notice {
                ui.add(widget::get_notice_label(notice));
            }

            for probe in &view.probes {
                ui.label(probe.as_str());
            }
        });

        ctx.request_repaint_after(self.frame_time);
    }
}
