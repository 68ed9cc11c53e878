//! A log4rs encoder that renders the record through a pattern and then
//! appends its key-value pairs as highlighted `key=value` text.

use std::io;

use log::{
    Record,
    kv::{Error, Key, Value, VisitSource},
};
use log4rs::encode::pattern::PatternEncoder;
use log4rs::encode::{Color, Encode, Style, Write};
use serde::Deserialize;

const DEFAULT_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} {h({l:<5})} {t} {m}";

#[derive(Debug, Deserialize)]
pub struct StructuredConsoleEncoderConfig {
    pub pattern: Option<String>,
    /// Highlight keys with colour. Defaults to on.
    #[serde(default)]
    pub color: Option<bool>,
}

#[derive(Debug)]
pub struct StructuredConsoleEncoder {
    delegate: PatternEncoder,
    color: bool,
}

impl StructuredConsoleEncoder {
    pub fn new(pattern: &str, color: bool) -> Self {
        Self {
            delegate: PatternEncoder::new(pattern),
            color,
        }
    }
}

impl Encode for StructuredConsoleEncoder {
    fn encode(&self, w: &mut dyn Write, record: &Record) -> anyhow::Result<()> {
        self.delegate.encode(w, record)?;

        let mut visitor = PairWriter {
            writer: w,
            color: self.color,
            io_err: None,
        };

        if let Err(kv_err) = record.key_values().visit(&mut visitor) {
            if let Some(io_err) = visitor.io_err {
                return Err(io_err.into());
            }
            write!(w, " [KV Error: {}]", kv_err)?;
        }

        w.write_all(b"\n")?;
        Ok(())
    }
}

/// Quotes values that would otherwise be ambiguous in `key=value` output.
fn render_value(raw: &str) -> String {
    if raw.is_empty() || raw.chars().any(|c| c.is_whitespace() || c == '"' || c == '=') {
        format!("{:?}", raw)
    } else {
        raw.to_string()
    }
}

struct PairWriter<'a> {
    writer: &'a mut dyn Write,
    color: bool,
    io_err: Option<io::Error>,
}

impl PairWriter<'_> {
    fn write_pair(&mut self, key: &Key<'_>, value: &Value<'_>) -> io::Result<()> {
        if self.color {
            self.writer.set_style(Style::new().text(Color::Cyan))?;
        }
        write!(self.writer, " {}=", key)?;
        if self.color {
            self.writer.set_style(&Style::default())?;
        }
        write!(self.writer, "{}", render_value(&value.to_string()))
    }
}

impl<'kvs> VisitSource<'kvs> for PairWriter<'_> {
    fn visit_pair(&mut self, key: Key<'kvs>, value: Value<'kvs>) -> Result<(), Error> {
        if let Err(e) = self.write_pair(&key, &value) {
            self.io_err = Some(e);
            return Err(Error::msg("io error during visit"));
        }
        Ok(())
    }
}

pub struct StructuredConsoleEncoderDeserializer;

impl log4rs::config::Deserialize for StructuredConsoleEncoderDeserializer {
    type Trait = dyn Encode;
    type Config = StructuredConsoleEncoderConfig;

    fn deserialize(
        &self,
        config: StructuredConsoleEncoderConfig,
        _: &log4rs::config::Deserializers,
    ) -> anyhow::Result<Box<dyn Encode>> {
        let pattern = config.pattern.as_deref().unwrap_or(DEFAULT_PATTERN);
        Ok(Box::new(StructuredConsoleEncoder::new(pattern, config.color.unwrap_or(true))))
    }
}
