//! Turns the accepted request shapes into canonical [`CreateCommand`]s
//!
//! Three shapes are accepted: structured fields with lenient ports, a single
//! quick URL (`scheme://host:port/target:port?k=v`), and a dual-endpoint
//! template. Normalization is pure; endpoint data a template needs is passed
//! in through [`NormalizeContext`].

use std::str::FromStr;

use passdeck_store::entities::tunnel::{LogLevel, TlsMode, TunnelMode};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::command::CreateCommand;
use crate::error::{ControlError, Result};

/// Integer that may arrive as a JSON number or a numeric string
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PortValue {
    Int(i64),
    Text(String),
    /// Anything else; rejected during normalization
    Other(serde_json::Value),
}

impl PortValue {
    pub fn as_int(&self, field: &str) -> Result<i64> {
        match self {
            PortValue::Int(v) => Ok(*v),
            PortValue::Text(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| ControlError::invalid(format!("{field} must be numeric, got {s:?}"))),
            PortValue::Other(v) => Err(ControlError::invalid(format!(
                "{field} must be numeric, got {v}"
            ))),
        }
    }

    pub fn as_port(&self, field: &str) -> Result<u16> {
        let value = self.as_int(field)?;
        u16::try_from(value)
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| ControlError::invalid(format!("{field} {value} is outside 1-65535")))
    }
}

impl From<u16> for PortValue {
    fn from(v: u16) -> Self {
        PortValue::Int(i64::from(v))
    }
}

impl From<&str> for PortValue {
    fn from(v: &str) -> Self {
        PortValue::Text(v.to_string())
    }
}

/// Field-by-field creation payload
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct StructuredCreate {
    pub name: String,
    pub endpoint_id: Option<i32>,
    pub mode: Option<String>,
    pub tunnel_address: Option<String>,
    pub tunnel_port: Option<PortValue>,
    pub target_address: Option<String>,
    pub target_port: Option<PortValue>,
    pub tls_mode: Option<String>,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
    pub log_level: Option<String>,
    pub min: Option<PortValue>,
    pub max: Option<PortValue>,
}

impl StructuredCreate {
    /// Whether this carries enough to replace a tunnel (endpoint and mode)
    pub fn is_full_payload(&self) -> bool {
        self.endpoint_id.is_some() && non_empty(self.mode.as_deref()).is_some()
    }
}

/// A quick URL bound to an endpoint and a name
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QuickCreate {
    pub endpoint_id: i32,
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateKind {
    /// One client-mode forward on one endpoint
    Single,
    Bothway,
    /// Same shape as `bothway`; only the generated names differ
    Intranet,
}

/// One side of a template
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RoleDescriptor {
    /// `server` or `client`
    #[serde(default, alias = "type")]
    pub role: Option<String>,
    #[serde(alias = "master_id")]
    pub endpoint_id: i32,
    pub target_host: String,
    pub target_port: PortValue,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TemplateRequest {
    pub mode: TemplateKind,
    #[serde(default)]
    pub listen_host: Option<String>,
    pub listen_port: PortValue,
    #[serde(default)]
    pub log: Option<String>,
    /// 0 = off, 1 = self-signed, 2 = custom certificate
    #[serde(default)]
    pub tls: u8,
    #[serde(default)]
    pub cert_path: Option<String>,
    #[serde(default)]
    pub key_path: Option<String>,
    #[serde(default)]
    pub inbounds: Option<RoleDescriptor>,
    #[serde(default)]
    pub outbounds: Option<RoleDescriptor>,
}

impl TemplateRequest {
    /// Endpoint whose base URL provides the server host, for pair templates
    pub fn server_endpoint_id(&self) -> Option<i32> {
        if self.mode == TemplateKind::Single {
            return None;
        }
        [self.inbounds.as_ref(), self.outbounds.as_ref()]
            .into_iter()
            .flatten()
            .find(|d| parse_role(d).ok() == Some(TunnelMode::Server))
            .map(|d| d.endpoint_id)
    }
}

/// Any accepted creation shape
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "form", rename_all = "snake_case")]
pub enum CreateRequest {
    Structured(StructuredCreate),
    Quick(QuickCreate),
    Template(TemplateRequest),
}

/// Result of normalization: one command, or a server/client pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedCreate {
    Single(CreateCommand),
    Pair {
        server: CreateCommand,
        client: CreateCommand,
    },
}

/// Data normalization needs from outside
#[derive(Debug, Clone, Default)]
pub struct NormalizeContext {
    /// Base URL of the template's server endpoint
    pub server_base_url: Option<String>,
    /// Seconds since the epoch, used in generated names
    pub timestamp: i64,
}

/// Normalize and validate any request shape
pub fn normalize(request: &CreateRequest, ctx: &NormalizeContext) -> Result<NormalizedCreate> {
    let normalized = match request {
        CreateRequest::Structured(s) => NormalizedCreate::Single(from_structured(s)?),
        CreateRequest::Quick(q) => {
            NormalizedCreate::Single(parse_quick(q.endpoint_id, &q.name, &q.url)?)
        }
        CreateRequest::Template(t) => from_template(t, ctx)?,
    };

    match &normalized {
        NormalizedCreate::Single(cmd) => cmd.validate()?,
        NormalizedCreate::Pair { server, client } => {
            server.validate()?;
            client.validate()?;
        }
    }
    Ok(normalized)
}

pub fn from_structured(s: &StructuredCreate) -> Result<CreateCommand> {
    let endpoint_id = s
        .endpoint_id
        .ok_or_else(|| ControlError::invalid("endpoint_id is required"))?;
    let mode = non_empty(s.mode.as_deref())
        .ok_or_else(|| ControlError::invalid("mode is required"))?
        .parse::<TunnelMode>()
        .map_err(ControlError::InvalidArgument)?;

    let tunnel_port = s
        .tunnel_port
        .as_ref()
        .ok_or_else(|| ControlError::invalid("tunnel_port is required"))?
        .as_port("tunnel_port")?;
    let target_port = s
        .target_port
        .as_ref()
        .ok_or_else(|| ControlError::invalid("target_port is required"))?
        .as_port("target_port")?;

    let tls_mode = match non_empty(s.tls_mode.as_deref()) {
        Some(raw) => raw.parse::<TlsMode>().map_err(ControlError::InvalidArgument)?,
        None => TlsMode::Off,
    };

    let (cert_path, key_path) = if tls_mode == TlsMode::CustomCert {
        (
            non_empty(s.cert_path.as_deref()).map(str::to_string),
            non_empty(s.key_path.as_deref()).map(str::to_string),
        )
    } else {
        (None, None)
    };

    Ok(CreateCommand {
        name: s.name.trim().to_string(),
        endpoint_id,
        mode,
        tunnel_address: s.tunnel_address.as_deref().unwrap_or("").trim().to_string(),
        tunnel_port,
        target_address: s.target_address.as_deref().unwrap_or("").trim().to_string(),
        target_port,
        tls_mode,
        cert_path,
        key_path,
        log_level: parse_log_level(s.log_level.as_deref())?,
        min_concurrency: lenient_i32(s.min.as_ref(), "min")?,
        max_concurrency: lenient_i32(s.max.as_ref(), "max")?,
    })
}

/// Parse a quick URL; the whole string may be percent-encoded once
pub fn parse_quick(endpoint_id: i32, name: &str, raw: &str) -> Result<CreateCommand> {
    let decoded = urlencoding::decode(raw.trim())
        .map_err(|e| ControlError::invalid(format!("invalid percent-encoding: {e}")))?;

    let (scheme, rest) = decoded
        .split_once("://")
        .ok_or_else(|| ControlError::invalid(format!("missing scheme in {decoded:?}")))?;
    let mode = match scheme.to_ascii_lowercase().as_str() {
        "server" => TunnelMode::Server,
        "client" => TunnelMode::Client,
        other => {
            return Err(ControlError::invalid(format!(
                "unsupported scheme {other:?}, expected server or client"
            )))
        }
    };

    let (path, query) = match rest.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (rest, None),
    };
    let (listen, target) = path
        .split_once('/')
        .ok_or_else(|| ControlError::invalid("missing target segment"))?;
    let target = target.trim_end_matches('/');
    if target.is_empty() {
        return Err(ControlError::invalid("missing target segment"));
    }

    let (tunnel_address, tunnel_port) = split_host_port(listen, "listen")?;
    let (target_address, target_port) = split_host_port(target, "target")?;
    if target_address.is_empty() {
        return Err(ControlError::invalid("target host must not be empty"));
    }

    let mut tls_mode = TlsMode::Off;
    let mut cert_path = None;
    let mut key_path = None;
    let mut log_level = None;
    let mut min_concurrency = None;
    let mut max_concurrency = None;

    for pair in query.unwrap_or("").split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        match key {
            "log" => log_level = parse_log_level(Some(value))?,
            "tls" => {
                tls_mode = value
                    .parse::<u8>()
                    .ok()
                    .and_then(TlsMode::from_code)
                    .ok_or_else(|| {
                        ControlError::invalid(format!("tls must be 0, 1 or 2, got {value:?}"))
                    })?
            }
            "cert" | "crt" => cert_path = non_empty(Some(value)).map(str::to_string),
            "key" => key_path = non_empty(Some(value)).map(str::to_string),
            "min" => min_concurrency = Some(parse_i32(value, "min")?),
            "max" => max_concurrency = Some(parse_i32(value, "max")?),
            other => debug!("Ignoring unknown quick URL parameter {:?}", other),
        }
    }

    if tls_mode != TlsMode::CustomCert {
        cert_path = None;
        key_path = None;
    }

    Ok(CreateCommand {
        name: name.trim().to_string(),
        endpoint_id,
        mode,
        tunnel_address,
        tunnel_port,
        target_address,
        target_port,
        tls_mode,
        cert_path,
        key_path,
        log_level,
        min_concurrency,
        max_concurrency,
    })
}

fn from_template(t: &TemplateRequest, ctx: &NormalizeContext) -> Result<NormalizedCreate> {
    let listen_port = t.listen_port.as_port("listen_port")?;
    let log_level = parse_log_level(t.log.as_deref())?;

    if t.mode == TemplateKind::Single {
        let inbound = t
            .inbounds
            .as_ref()
            .or(t.outbounds.as_ref())
            .ok_or_else(|| ControlError::invalid("single template requires inbounds"))?;
        return Ok(NormalizedCreate::Single(CreateCommand {
            name: format!("template-single-{}-{}", inbound.endpoint_id, ctx.timestamp),
            endpoint_id: inbound.endpoint_id,
            mode: TunnelMode::Client,
            tunnel_address: non_empty(t.listen_host.as_deref())
                .unwrap_or("")
                .to_string(),
            tunnel_port: listen_port,
            target_address: inbound.target_host.trim().to_string(),
            target_port: inbound.target_port.as_port("target_port")?,
            tls_mode: TlsMode::Off,
            cert_path: None,
            key_path: None,
            log_level,
            min_concurrency: None,
            max_concurrency: None,
        }));
    }

    let (server, client) = assign_roles(t)?;
    let tls_mode = TlsMode::from_code(t.tls).ok_or_else(|| {
        ControlError::invalid(format!("tls must be 0, 1 or 2, got {}", t.tls))
    })?;
    let base_url = ctx
        .server_base_url
        .as_deref()
        .ok_or_else(|| ControlError::invalid("server endpoint address is unknown"))?;
    let server_host = server_host(base_url)?;

    let prefix = match t.mode {
        TemplateKind::Intranet => "template-intranet-",
        _ => "template-",
    };
    let (cert_path, key_path) = if tls_mode == TlsMode::CustomCert {
        (
            non_empty(t.cert_path.as_deref()).map(str::to_string),
            non_empty(t.key_path.as_deref()).map(str::to_string),
        )
    } else {
        (None, None)
    };

    let server_cmd = CreateCommand {
        name: format!("{}server-{}-{}", prefix, server.endpoint_id, ctx.timestamp),
        endpoint_id: server.endpoint_id,
        mode: TunnelMode::Server,
        tunnel_address: String::new(),
        tunnel_port: listen_port,
        target_address: server.target_host.trim().to_string(),
        target_port: server.target_port.as_port("target_port")?,
        tls_mode,
        cert_path,
        key_path,
        log_level,
        min_concurrency: None,
        max_concurrency: None,
    };

    let client_cmd = CreateCommand {
        name: format!("{}client-{}-{}", prefix, client.endpoint_id, ctx.timestamp),
        endpoint_id: client.endpoint_id,
        mode: TunnelMode::Client,
        tunnel_address: server_host,
        tunnel_port: listen_port,
        target_address: client.target_host.trim().to_string(),
        target_port: client.target_port.as_port("target_port")?,
        tls_mode: TlsMode::Off,
        cert_path: None,
        key_path: None,
        log_level,
        min_concurrency: None,
        max_concurrency: None,
    };

    Ok(NormalizedCreate::Pair {
        server: server_cmd,
        client: client_cmd,
    })
}

/// Pick the server and client descriptors by role tag, not position
fn assign_roles(t: &TemplateRequest) -> Result<(&RoleDescriptor, &RoleDescriptor)> {
    let (a, b) = match (t.inbounds.as_ref(), t.outbounds.as_ref()) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(ControlError::invalid(
                "dual-endpoint template requires inbounds and outbounds",
            ))
        }
    };

    match (parse_role(a)?, parse_role(b)?) {
        (TunnelMode::Server, TunnelMode::Client) => Ok((a, b)),
        (TunnelMode::Client, TunnelMode::Server) => Ok((b, a)),
        _ => Err(ControlError::invalid(
            "template requires exactly one server and one client role",
        )),
    }
}

fn parse_role(d: &RoleDescriptor) -> Result<TunnelMode> {
    non_empty(d.role.as_deref())
        .ok_or_else(|| ControlError::invalid("template role is missing"))?
        .parse::<TunnelMode>()
        .map_err(ControlError::InvalidArgument)
}

/// Host part of an endpoint base URL (scheme, port and path stripped)
pub fn server_host(base_url: &str) -> Result<String> {
    let trimmed = base_url.trim();
    let host_of = |candidate: &str| {
        Url::parse(candidate)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .filter(|h| !h.is_empty())
    };

    host_of(trimmed)
        .or_else(|| host_of(&format!("http://{}", trimmed)))
        .ok_or_else(|| ControlError::invalid(format!("cannot derive host from {base_url:?}")))
}

fn split_host_port(segment: &str, label: &str) -> Result<(String, u16)> {
    let (host, port) = segment.rsplit_once(':').ok_or_else(|| {
        ControlError::invalid(format!("{label} segment {segment:?} has no port"))
    })?;
    let port = port
        .trim()
        .parse::<u32>()
        .map_err(|_| ControlError::invalid(format!("{label} port {port:?} is not numeric")))?;
    if !(1..=65535).contains(&port) {
        return Err(ControlError::invalid(format!(
            "{label} port {port} is outside 1-65535"
        )));
    }
    Ok((host.trim().to_string(), port as u16))
}

fn parse_log_level(raw: Option<&str>) -> Result<Option<LogLevel>> {
    non_empty(raw)
        .map(LogLevel::from_str)
        .transpose()
        .map_err(ControlError::InvalidArgument)
}

fn parse_i32(raw: &str, field: &str) -> Result<i32> {
    raw.trim()
        .parse::<i32>()
        .map_err(|_| ControlError::invalid(format!("{field} must be numeric, got {raw:?}")))
}

fn lenient_i32(value: Option<&PortValue>, field: &str) -> Result<Option<i32>> {
    value
        .map(|v| {
            let n = v.as_int(field)?;
            i32::try_from(n)
                .map_err(|_| ControlError::invalid(format!("{field} {n} is out of range")))
        })
        .transpose()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
