use anyhow::{Context, Result, bail};
use jack::{AsyncClient, Client, ClientOptions};
use log::{error, info, warn};

use crate::audio::engine::{Engine, EngineHandle};
use crate::audio::jack::{NotificationHandler, ProcessHandler};
use crate::audio::ports::{INPUT_PORT, OUTPUT_LEFT_PORT, OUTPUT_RIGHT_PORT};
use crate::control::rig::InputDevices;
use crate::settings::AudioSettings;

pub const CLIENT_NAME: &str = "mouthpiece";

fn own_port(port: &str) -> String {
    format!("{CLIENT_NAME}:{port}")
}

pub struct Manager {
    active_client: AsyncClient<NotificationHandler, ProcessHandler>,
    engine_handle: EngineHandle,
    current_input: Option<String>,
}

impl Manager {
    pub fn new(settings: &AudioSettings) -> Result<Self> {
        let (client, _) = Client::new(CLIENT_NAME, ClientOptions::NO_START_SERVER)
            .context("failed to create JACK client")?;

        let frames_per_second = client.sample_rate();
        let (engine, engine_handle) = Engine::new(frames_per_second as f32);
        let jack_handler =
            ProcessHandler::new(&client, engine).context("failed to create process handler")?;

        let active_client = client
            .activate_async(NotificationHandler::new(frames_per_second), jack_handler)
            .context("failed to activate async client")?;

        let mut manager = Self {
            active_client,
            engine_handle,
            current_input: None,
        };

        manager.connect_outputs(settings);
        match manager.connect_input(&settings.input_port) {
            Ok(()) => manager.current_input = Some(settings.input_port.clone()),
            Err(e) => warn!("{e:#}"),
        }

        Ok(manager)
    }

    fn connect_outputs(&self, settings: &AudioSettings) {
        let client = self.active_client.as_client();

        for (ours, theirs) in [
            (OUTPUT_LEFT_PORT, &settings.output_left_port),
            (OUTPUT_RIGHT_PORT, &settings.output_right_port),
        ] {
            let ours = own_port(ours);
            if let Err(e) = client.connect_ports_by_name(&ours, theirs) {
                warn!("Failed to connect output port '{theirs}': {e}");
            } else {
                info!("Connected output: {ours} -> {theirs}");
            }
        }
    }

    fn connect_input(&self, device: &str) -> Result<()> {
        let client = self.active_client.as_client();
        let ours = own_port(INPUT_PORT);

        client
            .connect_ports_by_name(device, &ours)
            .with_context(|| format!("failed to connect input port '{device}'"))?;

        info!("Connected input: {device} -> {ours}");
        Ok(())
    }

    fn disconnect_input(&self) {
        let client = self.active_client.as_client();

        if let Some(port) = client.port_by_name(&own_port(INPUT_PORT)) {
            client.disconnect(&port).unwrap_or_else(|e| {
                error!("Failed to disconnect {INPUT_PORT}: {e}");
            });
        }
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine_handle
    }

    pub fn current_input(&self) -> Option<&str> {
        self.current_input.as_deref()
    }

    pub fn sample_rate(&self) -> usize {
        self.active_client.as_client().sample_rate() as usize
    }
}

impl InputDevices for Manager {
    /// Moves the input port to `device_id`, falling back to the previous
    /// connection when the new one cannot be made.
    fn acquire(&mut self, device_id: &str) -> Result<()> {
        if device_id.is_empty() {
            bail!("empty input device id");
        }

        self.disconnect_input();

        if let Err(e) = self.connect_input(device_id) {
            if let Some(previous) = &self.current_input
                && let Err(restore) = self.connect_input(previous)
            {
                error!("Failed to restore input '{previous}': {restore:#}");
            }
            return Err(e);
        }

        self.current_input = Some(device_id.to_string());
        Ok(())
    }
}
