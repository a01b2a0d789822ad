//! Per-user gradient colors

use std::sync::Arc;

use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::room::UserId;

use super::client::{eq, StoreClient, StoreError};

const TABLE: &str = "user_colors";

/// A user's gradient pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserColors {
    pub color1: String,
    pub color2: String,
}

impl UserColors {
    /// Random pastel pair with the second hue offset from the first
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        let hue: f32 = rng.gen_range(0.0..360.0);
        let offset: f32 = rng.gen_range(30.0..90.0);
        Self {
            color1: hsl_to_hex(hue, 0.65, 0.6),
            color2: hsl_to_hex((hue + offset) % 360.0, 0.6, 0.75),
        }
    }

    pub fn is_valid(&self) -> bool {
        is_hex_color(&self.color1) && is_hex_color(&self.color2)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ColorRow {
    user_id: UserId,
    color1: String,
    color2: String,
}

/// Color preferences: in-memory cache in front of the optional store
#[derive(Clone)]
pub struct ColorStore {
    remote: Option<StoreClient>,
    cache: Arc<DashMap<UserId, UserColors>>,
}

impl ColorStore {
    pub fn new(remote: Option<StoreClient>) -> Self {
        Self {
            remote,
            cache: Default::default(),
        }
    }

    /// Fetch a user's colors, generating and saving a pair on first sight.
    ///
    /// Store failures are logged; a usable pair is always returned.
    pub async fn get_or_create(&self, user_id: &str) -> UserColors {
        if let Some(colors) = self.cache.get(user_id) {
            return colors.clone();
        }

        match self.fetch(user_id).await {
            Ok(Some(colors)) => {
                self.cache.insert(user_id.to_string(), colors.clone());
                return colors;
            }
            Ok(None) => debug!(user_id = %user_id, "No stored colors, generating"),
            Err(e) => error!(user_id = %user_id, error = %e, "Failed to fetch user colors"),
        }

        let colors = UserColors::random();
        // Another request may have raced us; keep whichever landed first
        let colors = self
            .cache
            .entry(user_id.to_string())
            .or_insert(colors)
            .clone();
        self.save(user_id, &colors).await;
        colors
    }

    /// Replace a user's colors
    pub async fn update(&self, user_id: &str, colors: UserColors) {
        self.cache.insert(user_id.to_string(), colors.clone());
        self.save(user_id, &colors).await;
    }

    async fn fetch(&self, user_id: &str) -> Result<Option<UserColors>, StoreError> {
        let Some(remote) = &self.remote else {
            return Ok(None);
        };
        let params = [
            eq("user_id", user_id),
            ("select", "user_id,color1,color2".to_string()),
        ];
        let row: Option<ColorRow> = remote.get_one(TABLE, &params).await?;
        Ok(row.map(|r| UserColors {
            color1: r.color1,
            color2: r.color2,
        }))
    }

    async fn save(&self, user_id: &str, colors: &UserColors) {
        let Some(remote) = &self.remote else {
            return;
        };
        let row = ColorRow {
            user_id: user_id.to_string(),
            color1: colors.color1.clone(),
            color2: colors.color2.clone(),
        };
        if let Err(e) = remote.upsert(TABLE, &row, "user_id").await {
            error!(user_id = %user_id, error = %e, "Failed to save user colors");
        }
    }
}

/// `#rgb` or `#rrggbb`
pub fn is_hex_color(value: &str) -> bool {
    match value.strip_prefix('#') {
        Some(hex) => (hex.len() == 3 || hex.len() == 6) && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

fn hsl_to_hex(hue: f32, saturation: f32, lightness: f32) -> String {
    let c = (1.0 - (2.0 * lightness - 1.0).abs()) * saturation;
    let h = hue / 60.0;
    let x = c * (1.0 - (h % 2.0 - 1.0).abs());
    let (r, g, b) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = lightness - c / 2.0;
    let channel = |v: f32| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    format!("#{:02x}{:02x}{:02x}", channel(r), channel(g), channel(b))
}
