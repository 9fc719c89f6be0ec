//! Template-driven log messages emitted around simulated work.

use crate::config::LogConfig;
use crate::counter::TriggerCounter;
use crate::template::{MessageContext, MessageRenderer, TemplateId};
use tracing::{debug, error, info, warn};

/// Level of a template log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl MessageLevel {
    /// Parse a configured level; unknown values log at info.
    pub fn parse(level: &str) -> Self {
        match level.trim().to_lowercase().as_str() {
            "debug" | "trace" => MessageLevel::Debug,
            "warn" | "warning" => MessageLevel::Warn,
            "error" => MessageLevel::Error,
            _ => MessageLevel::Info,
        }
    }

    /// Emit each line of `message` at this level.
    pub fn emit(self, message: &str) {
        for line in message.lines() {
            match self {
                MessageLevel::Debug => debug!("{}", line),
                MessageLevel::Info => info!("{}", line),
                MessageLevel::Warn => warn!("{}", line),
                MessageLevel::Error => error!("{}", line),
            }
        }
    }
}

/// Before/after messages for one endpoint or route, with call sampling.
#[derive(Debug)]
pub struct LogTemplates {
    before: Option<TemplateId>,
    after: Option<TemplateId>,
    before_level: MessageLevel,
    after_level: MessageLevel,
    log_on_call: u32,
    sampler: TriggerCounter,
}

impl LogTemplates {
    /// Compile the configured messages into `renderer`.
    pub fn new(config: &LogConfig, renderer: &mut MessageRenderer) -> Self {
        Self {
            before: renderer.compile(&config.before),
            after: renderer.compile(&config.after),
            before_level: MessageLevel::parse(&config.before_level),
            after_level: MessageLevel::parse(&config.after_level),
            log_on_call: config.log_on_call,
            sampler: TriggerCounter::every(config.log_on_call),
        }
    }

    /// Render the before template without logging it.
    pub fn before_message(&self, renderer: &MessageRenderer, ctx: &MessageContext<'_>) -> String {
        renderer.render(self.before.as_ref(), ctx)
    }

    /// Render the after template without logging it.
    pub fn after_message(&self, renderer: &MessageRenderer, ctx: &MessageContext<'_>) -> String {
        renderer.render(self.after.as_ref(), ctx)
    }

    /// Log the before message if this call is sampled.
    pub fn log_before(&self, renderer: &MessageRenderer, ctx: &MessageContext<'_>) {
        if self.before.is_some() && self.sample() {
            self.before_level.emit(&self.before_message(renderer, ctx));
        }
    }

    /// Log the after message.
    ///
    /// Paired with a before message it fires on every call unless logging is
    /// switched off; on its own it is sampled like a before message.
    pub fn log_after(&self, renderer: &MessageRenderer, ctx: &MessageContext<'_>) {
        if self.after.is_none() {
            return;
        }
        let fire = if self.before.is_some() {
            self.log_on_call != 0
        } else {
            self.sample()
        };
        if fire {
            self.after_level.emit(&self.after_message(renderer, ctx));
        }
    }

    fn sample(&self) -> bool {
        match self.log_on_call {
            0 => false,
            1 => true,
            _ => {
                self.sampler.increment();
                let fire = self.sampler.should_trigger();
                if fire {
                    self.sampler.reset();
                }
                fire
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::io;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn count(&self, needle: &str) -> usize {
            String::from_utf8_lossy(&self.0.lock()).matches(needle).count()
        }
    }

    /// Run `calls` before/after cycles and capture what got logged.
    fn run_cycles(before: &str, after: &str, log_on_call: u32, calls: usize) -> Captured {
        let mut renderer = MessageRenderer::new();
        let logging = templates(before, after, log_on_call, &mut renderer);
        let env = BTreeMap::new();
        let ctx = MessageContext::new("svc", &env);

        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            for _ in 0..calls {
                logging.log_before(&renderer, &ctx);
                logging.log_after(&renderer, &ctx);
            }
        });
        captured
    }

    fn templates(
        before: &str,
        after: &str,
        log_on_call: u32,
        renderer: &mut MessageRenderer,
    ) -> LogTemplates {
        let config = LogConfig {
            before: before.to_string(),
            after: after.to_string(),
            log_on_call,
            ..LogConfig::default()
        };
        LogTemplates::new(&config, renderer)
    }

    #[test]
    fn test_level_parse() {
        assert_eq!(MessageLevel::parse("Warning"), MessageLevel::Warn);
        assert_eq!(MessageLevel::parse("WARN"), MessageLevel::Warn);
        assert_eq!(MessageLevel::parse("debug"), MessageLevel::Debug);
        assert_eq!(MessageLevel::parse("error"), MessageLevel::Error);
        assert_eq!(MessageLevel::parse("verbose"), MessageLevel::Info);
    }

    #[test]
    fn test_sampling_every_third_call() {
        let logged = run_cycles("entering", "leaving", 3, 6);
        assert_eq!(logged.count("entering"), 2);
        assert_eq!(logged.count("leaving"), 6);
    }

    #[test]
    fn test_paired_after_fires_every_call() {
        let logged = run_cycles("BEFORE", "AFTER", 3, 3);
        assert_eq!(logged.count("BEFORE"), 1);
        assert_eq!(logged.count("AFTER"), 3);
    }

    #[test]
    fn test_never_and_always() {
        let never = run_cycles("entering", "leaving", 0, 5);
        assert_eq!(never.count("entering"), 0);
        assert_eq!(never.count("leaving"), 0);

        let always = run_cycles("entering", "leaving", 1, 5);
        assert_eq!(always.count("entering"), 5);
        assert_eq!(always.count("leaving"), 5);
    }

    #[test]
    fn test_after_only_samples_itself() {
        let logged = run_cycles("", "leaving", 2, 4);
        assert_eq!(logged.count("leaving"), 2);
    }

    #[test]
    fn test_paired_after_does_not_sample() {
        let mut renderer = MessageRenderer::new();
        let env = BTreeMap::new();
        let ctx = MessageContext::new("svc", &env);
        let logging = templates("before", "after", 5, &mut renderer);

        logging.log_before(&renderer, &ctx);
        assert_eq!(logging.sampler.count(), 1);
        logging.log_after(&renderer, &ctx);
        assert_eq!(logging.sampler.count(), 1);
    }

    #[test]
    fn test_multiline_message_logs_each_line() {
        let logged = run_cycles("first\nsecond", "", 1, 1);
        assert_eq!(logged.count("INFO"), 2);
    }

    #[test]
    fn test_messages_render() {
        let mut renderer = MessageRenderer::new();
        let env = BTreeMap::new();
        let ctx = MessageContext::new("checkout", &env);
        let logging = templates(
            "enter {{service_name}}",
            "leave {{service_name}}",
            1,
            &mut renderer,
        );

        assert_eq!(logging.before_message(&renderer, &ctx), "enter checkout");
        assert_eq!(logging.after_message(&renderer, &ctx), "leave checkout");
    }
}
