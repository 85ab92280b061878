use crate::config::{EmailConfig, NotificationConfig};
use crate::detector::Signal;
use crate::errors::ChannelError;
use async_trait::async_trait;
use futures::future::join_all;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use log::{info, warn};
use std::io::Write;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;

/// Independent delivery mechanism for an emitted signal.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &'static str;
    async fn notify(&self, signal: &Signal) -> Result<(), ChannelError>;
}

/// Outcome of one channel attempt within a dispatch.
#[derive(Debug)]
pub struct ChannelOutcome {
    pub channel: &'static str,
    pub result: Result<(), ChannelError>,
}

impl ChannelOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Prints the signal as a banner to an injected sink (stdout by default).
pub struct ConsoleChannel {
    sink: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleChannel {
    pub fn new() -> Self {
        Self::with_sink(Box::new(std::io::stdout()))
    }

    pub fn with_sink(sink: Box<dyn Write + Send>) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }
}

impl Default for ConsoleChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationChannel for ConsoleChannel {
    fn name(&self) -> &'static str {
        "console"
    }

    async fn notify(&self, signal: &Signal) -> Result<(), ChannelError> {
        let mut sink = self.sink.lock().await;
        writeln!(sink, "\n{}", "=".repeat(60))?;
        writeln!(sink, "{} signal triggered!", signal.signal_type)?;
        writeln!(sink, "{}", "=".repeat(60))?;
        writeln!(sink, "Symbol: {}", signal.symbol)?;
        writeln!(sink, "Time:   {}", signal.timestamp.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(sink, "Price:  ${:.2}", signal.price)?;
        writeln!(sink, "Upper:  ${:.2}", signal.upper_band)?;
        writeln!(sink, "Middle: ${:.2}", signal.middle_band)?;
        writeln!(sink, "Lower:  ${:.2}", signal.lower_band)?;
        writeln!(sink, "{}", signal.message)?;
        writeln!(sink, "{}", "=".repeat(60))?;
        sink.flush()?;
        Ok(())
    }
}

/// Submits the signal over SMTP (STARTTLS relay with credentials).
pub struct EmailChannel {
    config: EmailConfig,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailChannel {
    pub fn new(config: EmailConfig) -> Result<Self, ChannelError> {
        let credentials = Credentials::new(
            config.sender_email.clone(),
            config.sender_password.clone(),
        );
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_server)
            .map_err(|e| ChannelError::Smtp(e.to_string()))?
            .port(config.smtp_port)
            .credentials(credentials)
            .build();
        Ok(Self { config, transport })
    }

    fn compose(&self, signal: &Signal) -> Result<Message, ChannelError> {
        let from: Mailbox = self
            .config
            .sender_email
            .parse()
            .map_err(|e| ChannelError::Smtp(format!("bad sender address: {e}")))?;
        let to: Mailbox = self
            .config
            .recipient_email
            .parse()
            .map_err(|e| ChannelError::Smtp(format!("bad recipient address: {e}")))?;

        let subject = format!("{} trading signal: {}", signal.symbol, signal.signal_type);
        let body = format!(
            "Trading signal details:\n\n\
             Symbol:    {}\n\
             Type:      {}\n\
             Triggered: {}\n\
             Price:     ${:.2}\n\n\
             Bollinger bands:\n\
             Upper:  ${:.2}\n\
             Middle: ${:.2}\n\
             Lower:  ${:.2}\n\n\
             {}\n",
            signal.symbol,
            signal.signal_type,
            signal.timestamp.format("%Y-%m-%d %H:%M:%S"),
            signal.price,
            signal.upper_band,
            signal.middle_band,
            signal.lower_band,
            signal.message,
        );

        Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .body(body)
            .map_err(|e| ChannelError::Smtp(e.to_string()))
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn notify(&self, signal: &Signal) -> Result<(), ChannelError> {
        let message = self.compose(signal)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| ChannelError::Smtp(e.to_string()))?;
        info!("email notification sent to {}", self.config.recipient_email);
        Ok(())
    }
}

/// Best-effort local tone. Falls back to a terminal bell when no tone
/// command is available; a silent platform is success, not an error.
pub struct SoundChannel;

impl SoundChannel {
    fn tone_command() -> Option<(&'static str, &'static [&'static str])> {
        if cfg!(target_os = "macos") {
            Some(("afplay", &["/System/Library/Sounds/Glass.aiff"]))
        } else if cfg!(target_os = "linux") {
            Some((
                "paplay",
                &["/usr/share/sounds/freedesktop/stereo/complete.oga"],
            ))
        } else {
            None
        }
    }
}

#[async_trait]
impl NotificationChannel for SoundChannel {
    fn name(&self) -> &'static str {
        "sound"
    }

    async fn notify(&self, _signal: &Signal) -> Result<(), ChannelError> {
        if let Some((program, args)) = Self::tone_command() {
            if let Ok(output) = Command::new(program).args(args).output().await {
                if output.status.success() {
                    return Ok(());
                }
            }
        }

        let mut stdout = std::io::stdout();
        stdout.write_all(b"\x07")?;
        stdout.flush()?;
        Ok(())
    }
}

const DEFAULT_CHANNEL_DEADLINE: Duration = Duration::from_secs(15);

/// Fans a signal out to every configured channel.
///
/// Channels run concurrently, each under its own deadline, and every attempt
/// completes (success or recorded failure) before `dispatch` returns. One
/// channel failing never prevents the others from being attempted, and no
/// failure propagates to the caller.
pub struct Dispatcher {
    channels: Vec<Box<dyn NotificationChannel>>,
    channel_deadline: Duration,
}

impl Dispatcher {
    pub fn new(channels: Vec<Box<dyn NotificationChannel>>) -> Self {
        Self {
            channels,
            channel_deadline: DEFAULT_CHANNEL_DEADLINE,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.channel_deadline = deadline;
        self
    }

    /// Build the channel set from configured enablement. A channel that
    /// cannot be constructed (for example an unusable relay host) is skipped
    /// with a warning rather than failing startup.
    pub fn from_config(config: &NotificationConfig) -> Self {
        let mut channels: Vec<Box<dyn NotificationChannel>> = Vec::new();

        if config.console.enabled {
            channels.push(Box::new(ConsoleChannel::new()));
        }
        if config.email.enabled {
            match EmailChannel::new(config.email.clone()) {
                Ok(channel) => channels.push(Box::new(channel)),
                Err(e) => warn!("email channel disabled: {}", e),
            }
        }
        if config.sound.enabled {
            channels.push(Box::new(SoundChannel));
        }

        Self::new(channels)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub async fn dispatch(&self, signal: &Signal) -> Vec<ChannelOutcome> {
        let attempts = self.channels.iter().map(|channel| async move {
            let result =
                match tokio::time::timeout(self.channel_deadline, channel.notify(signal)).await {
                    Ok(result) => result,
                    Err(_) => Err(ChannelError::Timeout {
                        seconds: self.channel_deadline.as_secs(),
                    }),
                };

            if let Err(cause) = &result {
                warn!("{} channel failed to deliver signal: {}", channel.name(), cause);
            }
            ChannelOutcome {
                channel: channel.name(),
                result,
            }
        });

        join_all(attempts).await
    }
}
