//! Identification negotiator: standard dialects tried against a new channel.
//!
//! When a device appears on a bus the registry does not know what it is. The
//! negotiator walks a fixed-priority table of identification dialects, each a
//! (clear command, query command, parse rule) triple, and stops at the first
//! one that yields a usable device name. Transport failures and malformed
//! responses skip to the next dialect; they are never fatal.
//!
//! Devices that defeat every dialect are handed to the
//! [`arbiter`](crate::arbiter) for externally supplied fallback procedures.

use crate::bus::BusServer;
use crate::config::IdentificationSettings;
use std::time::Duration;
use tracing::{debug, trace};

/// Outcome of an identification pass over one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Parsed device name; `None` when no dialect (and later no procedure)
    /// produced one.
    pub name: Option<String>,
    /// Most recent response captured from the device. `None` means the query
    /// phase failed outright; `Some("")` means the device was addressed but
    /// stayed silent within the timeout.
    pub raw: Option<String>,
}

impl Resolution {
    /// A resolution carrying a name and the response it was parsed from.
    pub fn named(name: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            raw: Some(raw.into()),
        }
    }

    /// Whether a device name was produced.
    pub fn is_resolved(&self) -> bool {
        self.name.is_some()
    }
}

/// One standardized identification query/response convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Four-field `*IDN?` identity query
    Standard,
    /// Short `ID?` identity query
    ShortId,
    /// Vendor reset plus `OI` status query
    VendorStatus,
    /// `ID;` legacy status probe answered by a single known analyzer model
    LegacyStatus,
}

impl Dialect {
    /// Priority order in which dialects are tried.
    pub const ORDER: [Dialect; 4] = [
        Dialect::Standard,
        Dialect::ShortId,
        Dialect::VendorStatus,
        Dialect::LegacyStatus,
    ];

    /// Clear/reset command issued before the query; empty when none is needed.
    pub fn clear_command(self) -> &'static str {
        match self {
            Dialect::Standard => "*CLS",
            Dialect::ShortId => "",
            Dialect::VendorStatus => "CS",
            Dialect::LegacyStatus => "",
        }
    }

    /// The identity query itself.
    pub fn query_command(self) -> &'static str {
        match self {
            Dialect::Standard => "*IDN?",
            Dialect::ShortId => "ID?",
            Dialect::VendorStatus => "OI",
            Dialect::LegacyStatus => "ID;",
        }
    }

    /// Parse a response into a device name, or `None` when the response is
    /// empty or malformed for this dialect.
    pub fn parse(self, response: &str) -> Option<String> {
        if response.is_empty() {
            return None;
        }
        match self {
            Dialect::Standard => {
                // Manufacturer, model, version, revision. A comma-less reply
                // is a legacy device answering the wrong dialect.
                let upper = response.to_uppercase();
                let fields: Vec<&str> = upper.split(',').collect();
                if fields.len() != 4 {
                    return None;
                }
                let manufacturer = fields[0].replace('_', " ");
                Some(format!("{} {}", manufacturer, fields[1]))
            }
            Dialect::ShortId => {
                let upper = response.to_uppercase();
                match upper.split(',').next() {
                    Some(field) if !field.is_empty() => Some(field.to_string()),
                    _ => None,
                }
            }
            Dialect::VendorStatus => {
                // e.g. "08341BREV 01 AUG 86": keep the prefix before the
                // revision marker, canonicalizing the known legacy models.
                let trimmed = response.trim();
                match trimmed.split("REV").next() {
                    Some("08341B") => Some("HEWLETT-PACKARD 8341B".to_string()),
                    Some("08340B") => Some("HEWLETT-PACKARD 8340B".to_string()),
                    Some("8673") => Some("HEWLETT-PACKARD 8673E".to_string()),
                    Some(model) if !model.is_empty() => Some(model.to_string()),
                    _ => None,
                }
            }
            // The only instrument known to answer "ID;" at all.
            Dialect::LegacyStatus => Some("HP8593A".to_string()),
        }
    }
}

/// Tries the standard identification dialects against one channel.
#[derive(Debug, Clone)]
pub struct Negotiator {
    query_timeout: Duration,
    legacy_probe_delay: Duration,
}

impl Negotiator {
    /// Build a negotiator from the identification settings.
    pub fn new(settings: &IdentificationSettings) -> Self {
        Self {
            query_timeout: settings.query_timeout,
            legacy_probe_delay: settings.legacy_probe_delay,
        }
    }

    /// Try each dialect in priority order against `channel` on `bus`.
    ///
    /// Returns the first successfully parsed name, or an unresolved
    /// [`Resolution`] carrying whatever raw text was captured last.
    pub async fn identify(&self, bus: &dyn BusServer, channel: &str) -> Resolution {
        let mut raw: Option<String> = None;
        for dialect in Dialect::ORDER {
            if dialect == Dialect::LegacyStatus {
                // Slow legacy hardware needs to settle before it will answer.
                tokio::time::sleep(self.legacy_probe_delay).await;
            }
            let query = dialect.query_command();
            trace!(bus = bus.name(), channel, query, "sending identity query");
            let response = match bus
                .query(channel, dialect.clear_command(), query, self.query_timeout)
                .await
            {
                Ok(response) => response,
                Err(err) if err.is_timeout() => {
                    // The channel exists but stayed silent.
                    trace!(bus = bus.name(), channel, query, "no response");
                    raw = Some(String::new());
                    continue;
                }
                Err(err) => {
                    debug!(bus = bus.name(), channel, query, error = %err, "query failed");
                    continue;
                }
            };
            trace!(bus = bus.name(), channel, query, response, "received");
            raw = Some(response.clone());
            if let Some(name) = dialect.parse(&response) {
                debug!(
                    bus = bus.name(),
                    channel,
                    dialect = ?dialect,
                    device = %name,
                    "identified device"
                );
                return Resolution {
                    name: Some(name),
                    raw,
                };
            }
        }
        debug!(bus = bus.name(), channel, "no dialect matched");
        Resolution { name: None, raw }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBusServer, MockDevice};

    fn fast_negotiator() -> Negotiator {
        let settings = IdentificationSettings {
            query_timeout: Duration::from_millis(50),
            legacy_probe_delay: Duration::from_millis(1),
        };
        Negotiator::new(&settings)
    }

    #[test]
    fn standard_dialect_parses_four_fields() {
        assert_eq!(
            Dialect::Standard.parse("ACME,MODEL7,1.0,A").as_deref(),
            Some("ACME MODEL7")
        );
    }

    #[test]
    fn standard_dialect_replaces_underscores_and_uppercases() {
        assert_eq!(
            Dialect::Standard
                .parse("acme_labs,model7,1.0,a")
                .as_deref(),
            Some("ACME LABS MODEL7")
        );
    }

    #[test]
    fn standard_dialect_rejects_comma_less_and_wrong_arity() {
        assert_eq!(Dialect::Standard.parse("LEGACYDEV"), None);
        assert_eq!(Dialect::Standard.parse("ACME,MODEL7"), None);
        assert_eq!(Dialect::Standard.parse("A,B,C,D,E"), None);
        assert_eq!(Dialect::Standard.parse(""), None);
    }

    #[test]
    fn short_id_dialect_takes_first_field() {
        assert_eq!(
            Dialect::ShortId.parse("hp3478a,opt1").as_deref(),
            Some("HP3478A")
        );
        // A comma-less answer is accepted whole.
        assert_eq!(Dialect::ShortId.parse("LEGACYDEV").as_deref(), Some("LEGACYDEV"));
        assert_eq!(Dialect::ShortId.parse(",opt1"), None);
    }

    #[test]
    fn vendor_status_dialect_maps_known_models() {
        assert_eq!(
            Dialect::VendorStatus.parse("08341BREV 01 AUG 86").as_deref(),
            Some("HEWLETT-PACKARD 8341B")
        );
        assert_eq!(
            Dialect::VendorStatus.parse("08340BREV07 APR 92").as_deref(),
            Some("HEWLETT-PACKARD 8340B")
        );
        assert_eq!(
            Dialect::VendorStatus.parse("  8673  ").as_deref(),
            Some("HEWLETT-PACKARD 8673E")
        );
        // Unknown prefixes pass through verbatim.
        assert_eq!(
            Dialect::VendorStatus.parse("4395AREV01").as_deref(),
            Some("4395A")
        );
        assert_eq!(Dialect::VendorStatus.parse("REV 07"), None);
    }

    #[test]
    fn legacy_status_dialect_is_hard_coded() {
        assert_eq!(Dialect::LegacyStatus.parse("whatever").as_deref(), Some("HP8593A"));
        assert_eq!(Dialect::LegacyStatus.parse(""), None);
    }

    #[tokio::test]
    async fn identify_stops_at_first_matching_dialect() {
        let bus = MockBusServer::new("gpib0");
        bus.attach("14", MockDevice::new().with_response("*IDN?", "ACME,MODEL7,1.0,A"))
            .await;

        let resolution = fast_negotiator().identify(&bus, "14").await;
        assert_eq!(resolution.name.as_deref(), Some("ACME MODEL7"));
        assert_eq!(resolution.raw.as_deref(), Some("ACME,MODEL7,1.0,A"));

        // Only the first dialect was ever sent.
        let queries = bus.query_log().await;
        assert_eq!(queries, vec![("14".to_string(), "*IDN?".to_string())]);
    }

    #[tokio::test]
    async fn identify_falls_through_to_short_id() {
        let bus = MockBusServer::new("gpib0");
        bus.attach("9", MockDevice::new().with_response("ID?", "LEGACYDEV"))
            .await;

        let resolution = fast_negotiator().identify(&bus, "9").await;
        assert_eq!(resolution.name.as_deref(), Some("LEGACYDEV"));
    }

    #[tokio::test]
    async fn identify_records_empty_raw_on_silence() {
        let bus = MockBusServer::new("gpib0");
        bus.attach("22", MockDevice::silent()).await;

        let resolution = fast_negotiator().identify(&bus, "22").await;
        assert_eq!(resolution.name, None);
        // Timeouts mean the device was addressed but never answered.
        assert_eq!(resolution.raw.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn identify_leaves_raw_unset_on_hard_transport_failure() {
        let bus = MockBusServer::new("gpib0");
        bus.attach("3", MockDevice::faulty()).await;

        let resolution = fast_negotiator().identify(&bus, "3").await;
        assert_eq!(resolution.name, None);
        assert_eq!(resolution.raw, None);
    }

    #[tokio::test]
    async fn identify_skips_malformed_standard_response() {
        let bus = MockBusServer::new("gpib0");
        // Answers *IDN? with garbage but ID? correctly.
        bus.attach(
            "5",
            MockDevice::new()
                .with_response("*IDN?", "BADRESPONSE")
                .with_response("ID?", "HP3478A,0"),
        )
        .await;

        let resolution = fast_negotiator().identify(&bus, "5").await;
        assert_eq!(resolution.name.as_deref(), Some("HP3478A"));
        assert_eq!(resolution.raw.as_deref(), Some("HP3478A,0"));
    }
}
