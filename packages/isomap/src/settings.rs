//! Host-facing configuration.

use std::{
    fs,
    path::Path,
    time::Duration,
};
use anyhow::*;
use graphics::ContextTier;
use serde::{
    Serialize,
    Deserialize,
};


/// Graphics settings. Applied on the next context (re)initialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphicsSettings {
    /// Requested context tier. The surface may provide a lower one.
    pub context_tier: ContextTier,
    pub hdr: HdrMode,
    /// Sample normal maps with linear filtering.
    pub linear_normals: bool,
    pub point_lights: bool,
    /// Cache static chunks as macrotile impostors.
    pub macrotiles: bool,
    pub debug: DebugFlags,
    pub streaming: StreamingConfig,
}

impl Default for GraphicsSettings {
    fn default() -> Self {
        GraphicsSettings {
            context_tier: ContextTier::Extended,
            hdr: HdrMode::Half,
            linear_normals: true,
            point_lights: true,
            macrotiles: true,
            debug: DebugFlags::default(),
            streaming: StreamingConfig::default(),
        }
    }
}

impl GraphicsSettings {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("invalid graphics settings")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        Self::from_json(&json)
    }
}


/// Which floating point render targets to use, if supported.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HdrMode {
    /// 8-bit composite, no bloom.
    Off,
    /// Prefer half-float targets.
    Half,
    /// Prefer full float targets.
    Full,
}


/// Debug overlay flags, passed to shaders as defines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugFlags {
    pub show_geometry: bool,
    pub show_light_volumes: bool,
    pub show_macrotiles: bool,
}


/// Time budgets and limits of chunk streaming. Times in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Wall-clock time per frame after which no new chunks are created.
    pub chunk_creation_budget: f64,
    /// Wall-clock time per frame after which no more macrotiles are
    /// re-rendered.
    pub macrotile_budget: f64,
    /// Chunks idle for this long are disposed, checked at this interval.
    pub gc_interval: f64,
    /// Cap on the view radius, in chunks.
    pub max_view_radius: i32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        StreamingConfig {
            chunk_creation_budget: 1.0 / 60.0,
            macrotile_budget: 1.0 / 120.0,
            gc_interval: 5.0,
            max_view_radius: 10,
        }
    }
}

fn secs(n: f64) -> Duration {
    Duration::from_secs_f64(n.max(0.0))
}

impl StreamingConfig {
    pub fn chunk_creation_budget(&self) -> Duration {
        secs(self.chunk_creation_budget)
    }

    pub fn macrotile_budget(&self) -> Duration {
        secs(self.macrotile_budget)
    }

    pub fn gc_interval(&self) -> Duration {
        secs(self.gc_interval)
    }
}


#[test]
fn test_partial_json_keeps_defaults() {
    let settings = GraphicsSettings::from_json(r#"{
        "context_tier": "Basic",
        "macrotiles": false,
        "streaming": { "gc_interval": 2.5 }
    }"#).unwrap();
    assert_eq!(settings.context_tier, ContextTier::Basic);
    assert!(!settings.macrotiles);
    assert!(settings.point_lights);
    assert_eq!(settings.streaming.gc_interval(), Duration::from_millis(2500));
    assert_eq!(settings.streaming.max_view_radius, 10);
}

#[test]
fn test_bad_json_is_error() {
    assert!(GraphicsSettings::from_json(r#"{ "hdr": "Maybe" }"#).is_err());
}
