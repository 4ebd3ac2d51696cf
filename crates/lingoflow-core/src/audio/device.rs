//! Speaker output through rodio.
//!
//! rodio's `OutputStream` is not `Send`, so the stream and its sink live on a
//! dedicated audio thread. The engine talks to that thread over a channel and
//! the thread polls the sink to notice when a clip has drained.

use super::{AudioClip, AudioOutput, OnFinished};
use anyhow::{Context, Result, anyhow};
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, Sink};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

enum DeviceCommand {
    Play {
        clip: AudioClip,
        rate: f32,
        on_finished: OnFinished,
    },
    SetRate(f32),
    Stop,
    Shutdown,
}

pub struct RodioOutput {
    commands: mpsc::Sender<DeviceCommand>,
    thread: Option<JoinHandle<()>>,
}

impl RodioOutput {
    /// Open the default output device. Fails if no device is available.
    pub fn open(poll_interval: Duration) -> Result<Self> {
        let (commands, rx) = mpsc::channel::<DeviceCommand>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), String>>(1);

        let thread = std::thread::Builder::new()
            .name("lingoflow-audio".to_string())
            .spawn(move || run_device_thread(rx, ready_tx, poll_interval))
            .context("Spawning audio thread")?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!("Opened default audio output");
                Ok(Self {
                    commands,
                    thread: Some(thread),
                })
            }
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(anyhow!("Opening audio output: {err}"))
            }
            Err(_) => Err(anyhow!("Audio thread exited before reporting readiness")),
        }
    }

    fn send(&self, command: DeviceCommand) {
        if self.commands.send(command).is_err() {
            warn!("Audio thread is gone; dropping output command");
        }
    }
}

impl AudioOutput for RodioOutput {
    fn play(&mut self, clip: AudioClip, rate: f32, on_finished: OnFinished) -> Result<()> {
        self.commands
            .send(DeviceCommand::Play {
                clip,
                rate,
                on_finished,
            })
            .map_err(|_| anyhow!("Audio thread is not running"))
    }

    fn set_rate(&mut self, rate: f32) {
        self.send(DeviceCommand::SetRate(rate));
    }

    fn stop(&mut self) {
        self.send(DeviceCommand::Stop);
    }
}

impl Drop for RodioOutput {
    fn drop(&mut self) {
        let _ = self.commands.send(DeviceCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

struct Playing {
    sink: Sink,
    on_finished: Option<OnFinished>,
}

fn run_device_thread(
    rx: mpsc::Receiver<DeviceCommand>,
    ready: mpsc::SyncSender<Result<(), String>>,
    poll_interval: Duration,
) {
    let (_stream, handle) = match OutputStream::try_default() {
        Ok(pair) => pair,
        Err(err) => {
            let _ = ready.send(Err(err.to_string()));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    let mut rate = 1.0_f32;
    let mut current: Option<Playing> = None;
    loop {
        match rx.recv_timeout(poll_interval) {
            Ok(DeviceCommand::Play {
                clip,
                rate: clip_rate,
                on_finished,
            }) => {
                if let Some(mut previous) = current.take() {
                    previous.on_finished.take();
                    previous.sink.stop();
                }
                rate = clip_rate;
                let sink = match Sink::try_new(&handle) {
                    Ok(sink) => sink,
                    Err(err) => {
                        warn!("Failed to create audio sink: {err}");
                        // Report as drained so the engine moves on.
                        on_finished();
                        continue;
                    }
                };
                sink.set_speed(rate);
                sink.append(SamplesBuffer::new(
                    1,
                    clip.sample_rate(),
                    clip.samples().to_vec(),
                ));
                sink.play();
                debug!(?clip, rate, "Started device playback");
                current = Some(Playing {
                    sink,
                    on_finished: Some(on_finished),
                });
            }
            Ok(DeviceCommand::SetRate(new_rate)) => {
                rate = new_rate;
                if let Some(playing) = &current {
                    playing.sink.set_speed(rate);
                }
            }
            Ok(DeviceCommand::Stop) => {
                if let Some(mut playing) = current.take() {
                    playing.on_finished.take();
                    playing.sink.stop();
                    debug!("Stopped device playback");
                }
            }
            Ok(DeviceCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let drained = current
            .as_ref()
            .map(|playing| playing.sink.empty())
            .unwrap_or(false);
        if drained {
            if let Some(mut playing) = current.take() {
                if let Some(on_finished) = playing.on_finished.take() {
                    on_finished();
                }
            }
        }
    }

    if let Some(mut playing) = current.take() {
        playing.on_finished.take();
        playing.sink.stop();
    }
}
