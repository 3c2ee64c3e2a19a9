//! Output formatting for CLI

use console::style;
use roll_core::{NotificationRecord, Outbound};
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    Table,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "table" => OutputFormat::Table,
            _ => OutputFormat::Text,
        }
    }
}

/// Pretty JSON, `{}` if serialization fails
pub fn to_json<T: Serialize>(data: &T) -> String {
    serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string())
}

#[derive(Tabled)]
struct NotificationRow {
    #[tabled(rename = "Seq")]
    sequence: u64,
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Type")]
    kind: &'static str,
    #[tabled(rename = "Tab")]
    tab: u32,
    #[tabled(rename = "Detail")]
    detail: String,
}

/// One-line description of a notification's payload
pub fn detail(message: &Outbound) -> String {
    match message {
        Outbound::BadgeUpdate { count, summaries, .. } => {
            let real = summaries
                .iter()
                .find(|s| s.is_real)
                .map(|s| s.name.as_str())
                .unwrap_or("none");
            format!("{} candidate(s), real: {}", count, real)
        }
        Outbound::StorageUpdated { config, .. } | Outbound::Disabled { config, .. } => format!(
            "enable={} rate={} loop={} abLoop={}",
            config.enable, config.playback_rate, config.looping, config.ab_loop.on
        ),
        Outbound::AudioModeResult { mode, .. } => match mode {
            Some(mode) => format!("mode {}", mode),
            None => "no mode".to_string(),
        },
        Outbound::AudioFailed { message, .. } => message.clone(),
        Outbound::UpdateStreamAudio { stream, config, .. } => {
            format!("stream {} volume={}", stream, config.audio.volume)
        }
        Outbound::UpdateElementAudio { config, .. } => format!("volume={}", config.audio.volume),
        Outbound::ResetAudio { .. } | Outbound::DeleteAudio { .. } => String::new(),
    }
}

/// Render notifications in the selected format
pub fn render_records(records: &[NotificationRecord], format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => to_json(&records),
        OutputFormat::Table => {
            let rows = records.iter().map(|record| NotificationRow {
                sequence: record.sequence,
                time: record.timestamp.format("%H:%M:%S%.3f").to_string(),
                kind: record.message.name(),
                tab: record.message.tab().0,
                detail: detail(&record.message),
            });
            Table::new(rows).with(Style::rounded()).to_string()
        }
        OutputFormat::Text => records
            .iter()
            .map(|record| {
                format!(
                    "{:>3} {} {}",
                    style(record.sequence).dim(),
                    style(record.message.name()).cyan().bold(),
                    detail(&record.message)
                )
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roll_core::{AudioMode, TabId};

    #[test]
    fn test_format_from_str() {
        assert_eq!(OutputFormat::from("JSON"), OutputFormat::Json);
        assert_eq!(OutputFormat::from("table"), OutputFormat::Table);
        assert_eq!(OutputFormat::from("anything"), OutputFormat::Text);
    }

    #[test]
    fn test_detail() {
        let message = Outbound::AudioModeResult {
            tab_id: TabId(1),
            mode: Some(AudioMode::Element),
        };
        assert_eq!(detail(&message), "mode element");
        assert_eq!(detail(&Outbound::ResetAudio { tab_id: TabId(1) }), "");
    }
}
