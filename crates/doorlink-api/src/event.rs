//! Wire types for the device's server-sent event stream.
//!
//! A `state` event carries a JSON body describing the cover's position and
//! motion; `log` events carry opaque diagnostic text; `ping` events are
//! empty heartbeats proving the stream is alive.

use std::fmt;

use serde::Deserialize;

// ── DeviceEvent ──────────────────────────────────────────────────────

/// Door position as reported by the device. The device only knows the
/// two terminal positions; travel is inferred elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ReportedState {
    #[serde(rename = "CLOSED")]
    Closed,
    #[serde(rename = "OPEN")]
    Open,
}

/// The cover operation the device believes is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ReportedOperation {
    #[serde(rename = "IDLE")]
    Idle,
    #[serde(rename = "OPENING")]
    Opening,
    #[serde(rename = "CLOSING")]
    Closing,
}

/// A parsed `state` event from the device stream.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceEvent {
    /// Raw entity identity, formatted `"<template-name>-<template-id>"`.
    pub id: String,

    /// Reported terminal position.
    pub state: ReportedState,

    /// Raw numeric cover value (0.0 = closed, 1.0 = open).
    #[serde(default)]
    pub value: f64,

    /// Operation in progress on the device side.
    pub current_operation: ReportedOperation,
}

impl DeviceEvent {
    /// Parse the entity identity out of the raw `id` field.
    ///
    /// Returns `None` when the field does not follow the
    /// `"<template-name>-<template-id>"` format.
    pub fn device_id(&self) -> Option<DeviceId> {
        DeviceId::parse(&self.id)
    }
}

// ── DeviceId ─────────────────────────────────────────────────────────

/// Parsed device identity, split at the first `-` of the wire form.
///
/// Both halves are needed to address the command endpoint:
/// `POST /{template_name}/{template_id}/{open|close}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId {
    pub template_name: String,
    pub template_id: String,
}

impl DeviceId {
    /// Parse `"<template-name>-<template-id>"`. Either half being empty
    /// is treated as malformed.
    pub fn parse(raw: &str) -> Option<Self> {
        let (name, id) = raw.split_once('-')?;
        if name.is_empty() || id.is_empty() {
            return None;
        }
        Some(Self {
            template_name: name.to_owned(),
            template_id: id.to_owned(),
        })
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.template_name, self.template_id)
    }
}

// ── StreamEvent ──────────────────────────────────────────────────────

/// A decoded event from the device stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Door state report (JSON body).
    State(DeviceEvent),
    /// Diagnostic text from the device firmware.
    Log(String),
    /// Empty heartbeat.
    Ping,
}

// ── Tests ────────────────────────────────────────────────────────────
