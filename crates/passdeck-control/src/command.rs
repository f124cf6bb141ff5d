//! Canonical tunnel creation command

use passdeck_store::entities::tunnel::{LogLevel, TlsMode, TunnelMode};
use serde::Serialize;

use crate::error::{ControlError, Result};

/// Everything needed to create one tunnel on one agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateCommand {
    pub name: String,
    pub endpoint_id: i32,
    pub mode: TunnelMode,
    /// Listen host; empty means all interfaces
    pub tunnel_address: String,
    pub tunnel_port: u16,
    pub target_address: String,
    pub target_port: u16,
    pub tls_mode: TlsMode,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
    pub log_level: Option<LogLevel>,
    pub min_concurrency: Option<i32>,
    pub max_concurrency: Option<i32>,
}

impl CreateCommand {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ControlError::invalid("tunnel name must not be empty"));
        }
        if self.endpoint_id <= 0 {
            return Err(ControlError::invalid(format!(
                "invalid endpoint id {}",
                self.endpoint_id
            )));
        }
        if self.tunnel_port == 0 {
            return Err(ControlError::invalid("listen port must be within 1-65535"));
        }
        if self.target_port == 0 {
            return Err(ControlError::invalid("target port must be within 1-65535"));
        }
        if self.target_address.trim().is_empty() {
            return Err(ControlError::invalid("target address must not be empty"));
        }
        if self.tls_mode == TlsMode::CustomCert
            && (self.cert_path.is_none() || self.key_path.is_none())
        {
            return Err(ControlError::invalid(
                "custom-cert TLS requires both a certificate and a key path",
            ));
        }
        for (label, value) in [
            ("min", self.min_concurrency),
            ("max", self.max_concurrency),
        ] {
            if let Some(v) = value {
                if v < 0 {
                    return Err(ControlError::invalid(format!(
                        "{label} must not be negative"
                    )));
                }
            }
        }
        if let (Some(min), Some(max)) = (self.min_concurrency, self.max_concurrency) {
            if min > max {
                return Err(ControlError::invalid(format!(
                    "min ({min}) must not exceed max ({max})"
                )));
            }
        }
        Ok(())
    }

    /// Render the URL sent to the agent
    ///
    /// `scheme://[host]:port/target:port?tls=..&log=..&crt=..&key=..&min=..&max=..`,
    /// with absent options omitted. Parsing the result as a quick URL yields
    /// the same command.
    pub fn command_line(&self) -> String {
        let mut url = format!(
            "{}://{}:{}/{}:{}",
            self.mode, self.tunnel_address, self.tunnel_port, self.target_address, self.target_port
        );

        let mut params: Vec<String> = Vec::new();
        if self.tls_mode != TlsMode::Off {
            params.push(format!("tls={}", self.tls_mode.code()));
        }
        if let Some(level) = self.log_level {
            params.push(format!("log={}", level));
        }
        if self.tls_mode == TlsMode::CustomCert {
            if let Some(cert) = &self.cert_path {
                params.push(format!("crt={}", cert));
            }
            if let Some(key) = &self.key_path {
                params.push(format!("key={}", key));
            }
        }
        if let Some(min) = self.min_concurrency {
            params.push(format!("min={}", min));
        }
        if let Some(max) = self.max_concurrency {
            params.push(format!("max={}", max));
        }

        if !params.is_empty() {
            url.push('?');
            url.push_str(&params.join("&"));
        }
        url
    }
}
