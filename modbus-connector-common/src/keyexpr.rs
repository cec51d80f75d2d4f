/// Default key expression prefix for everything the connector publishes.
pub const KEY_PREFIX: &str = "modbus-connector";

const CONNECTIONS: &str = "connections";
const READINGS: &str = "readings";

/// Characters Zenoh reserves in key expressions.
const RESERVED: &[char] = &['/', '*', '$', '#', '?'];

/// Which per-device stream a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// Latest lifecycle event (`<prefix>/connections/<device_id>`).
    Connections,
    /// Read log (`<prefix>/readings/<device_id>`).
    Readings,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Connections => CONNECTIONS,
            Channel::Readings => READINGS,
        }
    }
}

/// Builder for connector key expressions.
///
/// Key expressions follow the pattern `<prefix>/<channel>/<device_id>`.
#[derive(Debug, Clone)]
pub struct KeyExprBuilder {
    prefix: String,
}

impl Default for KeyExprBuilder {
    fn default() -> Self {
        Self::new(KEY_PREFIX)
    }
}

impl KeyExprBuilder {
    /// Create a builder with the given prefix. Trailing slashes are dropped.
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key for a device's latest lifecycle event.
    ///
    /// # Example
    /// ```
    /// use modbus_connector_common::keyexpr::KeyExprBuilder;
    ///
    /// let builder = KeyExprBuilder::default();
    /// assert_eq!(builder.connection("plc01"), "modbus-connector/connections/plc01");
    /// ```
    pub fn connection(&self, device_id: &str) -> String {
        self.build(Channel::Connections, device_id)
    }

    /// Key for a device's read log.
    ///
    /// # Example
    /// ```
    /// use modbus_connector_common::keyexpr::KeyExprBuilder;
    ///
    /// let builder = KeyExprBuilder::new("plant/a");
    /// assert_eq!(builder.readings("plc01"), "plant/a/readings/plc01");
    /// ```
    pub fn readings(&self, device_id: &str) -> String {
        self.build(Channel::Readings, device_id)
    }

    pub fn build(&self, channel: Channel, device_id: &str) -> String {
        format!("{}/{}/{}", self.prefix, channel.as_str(), device_id)
    }

    /// Wildcard matching one channel for every device.
    pub fn channel_wildcard(&self, channel: Channel) -> String {
        format!("{}/{}/*", self.prefix, channel.as_str())
    }

    /// Wildcard matching everything under the prefix.
    pub fn all_wildcard(&self) -> String {
        format!("{}/**", self.prefix)
    }

    /// Key for the service status document.
    pub fn status_key(&self) -> String {
        format!("{}/@/status", self.prefix)
    }

    /// Split a key built by this builder back into its channel and device id.
    ///
    /// Returns `None` for keys outside the prefix or with an unknown channel.
    pub fn parse<'a>(&self, key: &'a str) -> Option<ParsedKeyExpr<'a>> {
        let rest = key.strip_prefix(self.prefix.as_str())?.strip_prefix('/')?;
        let (channel, device_id) = rest.split_once('/')?;

        let channel = match channel {
            CONNECTIONS => Channel::Connections,
            READINGS => Channel::Readings,
            _ => return None,
        };

        if !is_valid_device_id(device_id) {
            return None;
        }

        Some(ParsedKeyExpr { channel, device_id })
    }
}

/// Parsed components of a connector key expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedKeyExpr<'a> {
    pub channel: Channel,
    pub device_id: &'a str,
}

/// Whether `device_id` can be used as a single key expression chunk.
pub fn is_valid_device_id(device_id: &str) -> bool {
    !device_id.trim().is_empty() && !device_id.contains(RESERVED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_builder() {
        let builder = KeyExprBuilder::default();

        assert_eq!(builder.connection("plc01"), "modbus-connector/connections/plc01");
        assert_eq!(builder.readings("plc01"), "modbus-connector/readings/plc01");
        assert_eq!(
            builder.channel_wildcard(Channel::Readings),
            "modbus-connector/readings/*"
        );
        assert_eq!(builder.all_wildcard(), "modbus-connector/**");
        assert_eq!(builder.status_key(), "modbus-connector/@/status");
    }

    #[test]
    fn test_custom_prefix_trims_slash() {
        let builder = KeyExprBuilder::new("site/line1/");
        assert_eq!(builder.prefix(), "site/line1");
        assert_eq!(builder.connection("d1"), "site/line1/connections/d1");
    }

    #[test]
    fn test_parse_key_expr() {
        let builder = KeyExprBuilder::new("site/line1");
        let parsed = builder.parse("site/line1/readings/meter-7").unwrap();

        assert_eq!(parsed.channel, Channel::Readings);
        assert_eq!(parsed.device_id, "meter-7");
    }

    #[test]
    fn test_parse_invalid_key() {
        let builder = KeyExprBuilder::default();

        assert!(builder.parse("other/connections/d1").is_none());
        assert!(builder.parse("modbus-connector/unknown/d1").is_none());
        assert!(builder.parse("modbus-connector/readings/a/b").is_none());
        assert!(builder.parse("modbus-connector/readings").is_none());
    }

    #[test]
    fn test_device_id_validation() {
        assert!(is_valid_device_id("plc01"));
        assert!(is_valid_device_id("line 2 meter"));
        assert!(!is_valid_device_id(""));
        assert!(!is_valid_device_id("   "));
        assert!(!is_valid_device_id("a/b"));
        assert!(!is_valid_device_id("meter*"));
    }
}
