//! Subscriber construction

use tracing_subscriber::{
    EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::{Config, Format, LogError, LogResult};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Builds a format layer with the shared display options applied
macro_rules! fmt_layer {
    ($layer:expr, $display:expr) => {{
        let layer = $layer
            .with_writer(std::io::stderr)
            .with_ansi($display.colors)
            .with_target($display.target)
            .with_file($display.source)
            .with_line_number($display.source);

        if $display.time {
            layer.boxed()
        } else {
            layer.without_time().boxed()
        }
    }};
}

/// Logger builder
pub struct LoggerBuilder {
    config: Config,
}

impl LoggerBuilder {
    /// Create builder from config
    #[must_use]
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    /// Parse the filter directives without installing anything
    pub fn filter(&self) -> LogResult<EnvFilter> {
        EnvFilter::try_new(&self.config.level).map_err(|e| LogError::Filter {
            directives: self.config.level.clone(),
            reason: e.to_string(),
        })
    }

    /// Install the subscriber as the global default
    ///
    /// # Errors
    ///
    /// Returns error if the filter does not parse or a global subscriber is
    /// already set.
    pub fn build(self) -> LogResult<()> {
        let filter = self.filter()?;

        Registry::default()
            .with(self.format_layer())
            .with(filter)
            .try_init()
            .map_err(|e| LogError::AlreadyInitialized(e.to_string()))
    }

    fn format_layer(&self) -> BoxedLayer {
        let display = &self.config.display;
        match self.config.format {
            Format::Pretty => fmt_layer!(tracing_subscriber::fmt::layer().pretty(), display),
            Format::Compact => fmt_layer!(tracing_subscriber::fmt::layer().compact(), display),
            Format::Json => fmt_layer!(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .flatten_event(display.flatten),
                display
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_accepts_directive_lists() {
        let builder = LoggerBuilder::from_config(
            Config::default().with_level("info,faunakeys_engine=debug,reqwest=warn"),
        );
        assert!(builder.filter().is_ok());
    }

    #[test]
    fn test_bad_filter_is_reported_before_install() {
        let builder =
            LoggerBuilder::from_config(Config::default().with_level("faunakeys_engine=loud"));

        let err = builder.build().unwrap_err();
        assert!(matches!(err, LogError::Filter { ref directives, .. } if directives == "faunakeys_engine=loud"));
    }
}
