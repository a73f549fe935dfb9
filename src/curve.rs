//! Fan curve profiles: validation and temperature to speed interpolation

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::{Result, SmcBridgeError};

/// Minimum number of points a usable curve must have.
pub const MIN_CURVE_POINTS: usize = 2;
/// Maximum number of points a curve may have.
pub const MAX_CURVE_POINTS: usize = 10;

/// Why a curve profile failed validation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CurveError {
    #[error("too few points ({count}, minimum is 2)")]
    TooFewPoints { count: usize },

    #[error("too many points ({count}, maximum is 10)")]
    TooManyPoints { count: usize },

    #[error("temperature {0}°C is outside the configured bounds")]
    InvalidTemperature(f64),

    #[error("fan speed {0} RPM is negative")]
    InvalidSpeed(i32),

    #[error("two points share the same temperature")]
    DuplicateTemperature,
}

/// Global temperature bounds every curve point must fall inside.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CurveLimits {
    pub min_temperature: f64,
    pub max_temperature: f64,
}

impl Default for CurveLimits {
    fn default() -> Self {
        Self {
            min_temperature: 0.0,
            max_temperature: 110.0,
        }
    }
}

/// One temperature to fan speed mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurvePoint {
    /// Runtime handle for edits; not part of the persisted shape.
    #[serde(skip, default)]
    pub id: u32,
    pub temperature: f64,
    pub fan_speed: i32,
}

/// A named, editable fan curve.
///
/// Mutators bump `updated_at` but perform no validation; a profile may be
/// transiently invalid between edits. Call [`CurveProfile::validate`] before
/// using a profile as control input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurveProfile {
    pub id: String,
    pub name: String,
    pub points: Vec<CurvePoint>,
    pub is_active: bool,
    pub created_at: DateTime<Local>,
    pub updated_at: DateTime<Local>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
}

impl CurveProfile {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Local::now();
        Self {
            id: id.into(),
            name: name.into(),
            points: Vec::new(),
            is_active: false,
            created_at: now,
            updated_at: now,
            description: None,
        }
    }

    /// A sane default curve for desktop machines.
    pub fn standard() -> Self {
        let mut profile = Self::new("standard", "Standard");
        profile.add_point(40.0, 1200);
        profile.add_point(60.0, 1800);
        profile.add_point(80.0, 2500);
        profile.add_point(90.0, 3200);
        profile
    }

    /// Add a point and return its id. Points stay sorted by temperature.
    pub fn add_point(&mut self, temperature: f64, fan_speed: i32) -> u32 {
        let id = self.points.iter().map(|p| p.id).max().unwrap_or(0) + 1;
        self.points.push(CurvePoint {
            id,
            temperature,
            fan_speed,
        });
        self.sort_points();
        self.touch();
        id
    }

    /// Remove the point with the given id, if present.
    pub fn remove_point(&mut self, id: u32) -> Option<CurvePoint> {
        let index = self.points.iter().position(|p| p.id == id)?;
        let point = self.points.remove(index);
        self.touch();
        Some(point)
    }

    /// Update the point with the given id. Returns false when unknown.
    pub fn update_point(&mut self, id: u32, temperature: f64, fan_speed: i32) -> bool {
        let Some(point) = self.points.iter_mut().find(|p| p.id == id) else {
            return false;
        };
        point.temperature = temperature;
        point.fan_speed = fan_speed;
        self.sort_points();
        self.touch();
        true
    }

    /// Check the profile against the configured limits.
    ///
    /// Failures are reported in a fixed priority order: point count first,
    /// then temperature bounds, then speeds, then duplicates.
    pub fn validate(&self, limits: &CurveLimits) -> std::result::Result<(), CurveError> {
        let count = self.points.len();
        if count < MIN_CURVE_POINTS {
            return Err(CurveError::TooFewPoints { count });
        }
        if count > MAX_CURVE_POINTS {
            return Err(CurveError::TooManyPoints { count });
        }
        for point in &self.points {
            if point.temperature < limits.min_temperature
                || point.temperature > limits.max_temperature
            {
                return Err(CurveError::InvalidTemperature(point.temperature));
            }
        }
        for point in &self.points {
            if point.fan_speed < 0 {
                return Err(CurveError::InvalidSpeed(point.fan_speed));
            }
        }
        let distinct: HashSet<u64> = self
            .points
            .iter()
            .map(|p| p.temperature.to_bits())
            .collect();
        if distinct.len() != count {
            return Err(CurveError::DuplicateTemperature);
        }
        Ok(())
    }

    /// Interpolate a target fan speed for a temperature.
    ///
    /// Temperatures at or below the first point clamp to its speed, at or
    /// above the last point to its speed. In between, linear interpolation
    /// over the bracketing pair, rounded to the nearest RPM. Requires a
    /// validated profile; duplicate temperatures give unspecified results.
    pub fn interpolate_fan_speed(&self, temperature: f64) -> i32 {
        let Some(first) = self.points.first() else {
            return 0;
        };
        if temperature <= first.temperature {
            return first.fan_speed;
        }
        let last = &self.points[self.points.len() - 1];
        if temperature >= last.temperature {
            return last.fan_speed;
        }
        for pair in self.points.windows(2) {
            let (low, high) = (&pair[0], &pair[1]);
            if temperature >= low.temperature && temperature <= high.temperature {
                let factor = (temperature - low.temperature) / (high.temperature - low.temperature);
                let speed = low.fan_speed as f64 + factor * (high.fan_speed - low.fan_speed) as f64;
                return speed.round() as i32;
            }
        }
        last.fan_speed
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| SmcBridgeError::Unknown(format!("profile encoding failed: {}", e)))?;
        fs::write(path, json)
            .map_err(|e| SmcBridgeError::Unknown(format!("profile write failed: {}", e)))?;
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .map_err(|e| SmcBridgeError::Unknown(format!("profile read failed: {}", e)))?;
        let mut profile: CurveProfile = serde_json::from_str(&json)
            .map_err(|e| SmcBridgeError::Unknown(format!("profile decoding failed: {}", e)))?;
        // Point ids are not persisted; hand out fresh ones.
        for (i, point) in profile.points.iter_mut().enumerate() {
            point.id = i as u32 + 1;
        }
        profile.sort_points();
        Ok(profile)
    }

    fn sort_points(&mut self) {
        self.points.sort_by(|a, b| {
            a.temperature
                .partial_cmp(&b.temperature)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    fn touch(&mut self) {
        self.updated_at = Local::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile_with(points: &[(f64, i32)]) -> CurveProfile {
        let mut profile = CurveProfile::new("test", "Test");
        for (temp, speed) in points {
            profile.add_point(*temp, *speed);
        }
        profile
    }

    #[test]
    fn interpolation_between_points() {
        let profile = profile_with(&[(40.0, 1200), (60.0, 1800), (80.0, 2500), (90.0, 3200)]);
        // midway between 60C/1800 and 80C/2500
        assert_eq!(profile.interpolate_fan_speed(70.0), 2150);
        assert_eq!(profile.interpolate_fan_speed(85.0), 2850);
    }

    #[test]
    fn interpolation_at_exact_points() {
        let profile = profile_with(&[(40.0, 1200), (60.0, 1800), (80.0, 2500)]);
        assert_eq!(profile.interpolate_fan_speed(40.0), 1200);
        assert_eq!(profile.interpolate_fan_speed(60.0), 1800);
        assert_eq!(profile.interpolate_fan_speed(80.0), 2500);
    }

    #[test]
    fn interpolation_clamps_outside_the_domain() {
        let profile = profile_with(&[(40.0, 1200), (90.0, 3200)]);
        assert_eq!(profile.interpolate_fan_speed(-10.0), 1200);
        assert_eq!(profile.interpolate_fan_speed(39.9), 1200);
        assert_eq!(profile.interpolate_fan_speed(90.1), 3200);
        assert_eq!(profile.interpolate_fan_speed(150.0), 3200);
    }

    #[test]
    fn interpolation_rounds_to_nearest_rpm() {
        let profile = profile_with(&[(0.0, 0), (10.0, 5)]);
        // 0.5 rounds away from zero
        assert_eq!(profile.interpolate_fan_speed(1.0), 1);
        assert_eq!(profile.interpolate_fan_speed(0.8), 0);
    }

    #[test]
    fn interpolation_is_monotonic_for_monotonic_curves() {
        let profile = profile_with(&[(30.0, 800), (50.0, 1500), (70.0, 2400), (95.0, 4000)]);
        let mut last = i32::MIN;
        let mut t = 20.0;
        while t <= 100.0 {
            let speed = profile.interpolate_fan_speed(t);
            assert!(speed >= last, "speed decreased at {}", t);
            last = speed;
            t += 0.5;
        }
    }

    #[test]
    fn validate_rejects_too_few_points() {
        let limits = CurveLimits::default();
        let empty = profile_with(&[]);
        assert_eq!(
            empty.validate(&limits),
            Err(CurveError::TooFewPoints { count: 0 })
        );
        let single = profile_with(&[(40.0, 1200)]);
        assert_eq!(
            single.validate(&limits),
            Err(CurveError::TooFewPoints { count: 1 })
        );
    }

    #[test]
    fn validate_rejects_too_many_points() {
        let points: Vec<(f64, i32)> = (0..11).map(|i| (i as f64 * 10.0, i * 100)).collect();
        let profile = profile_with(&points);
        assert_eq!(
            profile.validate(&CurveLimits::default()),
            Err(CurveError::TooManyPoints { count: 11 })
        );
    }

    #[test]
    fn validate_rejects_out_of_bounds_temperature() {
        let profile = profile_with(&[(-20.0, 1200), (60.0, 1800)]);
        assert!(matches!(
            profile.validate(&CurveLimits::default()),
            Err(CurveError::InvalidTemperature(_))
        ));
    }

    #[test]
    fn validate_rejects_negative_speed() {
        let profile = profile_with(&[(40.0, -5), (60.0, 1800)]);
        assert_eq!(
            profile.validate(&CurveLimits::default()),
            Err(CurveError::InvalidSpeed(-5))
        );
    }

    #[test]
    fn validate_rejects_duplicate_temperatures() {
        let profile = profile_with(&[(40.0, 1200), (40.0, 1800), (60.0, 2000)]);
        assert_eq!(
            profile.validate(&CurveLimits::default()),
            Err(CurveError::DuplicateTemperature)
        );
    }

    #[test]
    fn validate_accepts_the_standard_profile() {
        assert_eq!(
            CurveProfile::standard().validate(&CurveLimits::default()),
            Ok(())
        );
    }

    #[test]
    fn count_errors_take_priority_over_content_errors() {
        // one point, and it is also out of bounds
        let profile = profile_with(&[(-50.0, -10)]);
        assert_eq!(
            profile.validate(&CurveLimits::default()),
            Err(CurveError::TooFewPoints { count: 1 })
        );
    }

    #[test]
    fn mutators_bump_updated_at_without_validating() {
        let mut profile = CurveProfile::new("edit", "Edit");
        let before = profile.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(5));
        let id = profile.add_point(40.0, 1200);
        assert!(profile.updated_at > before);

        let after_add = profile.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(profile.update_point(id, 45.0, -100));
        assert!(profile.updated_at > after_add);

        // no auto-validation: the negative speed is still there
        assert_eq!(profile.points[0].fan_speed, -100);

        let after_update = profile.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(profile.remove_point(id).is_some());
        assert!(profile.updated_at > after_update);
        assert!(profile.remove_point(id).is_none());
    }

    #[test]
    fn points_stay_sorted_by_temperature() {
        let mut profile = CurveProfile::new("sort", "Sort");
        profile.add_point(80.0, 2500);
        profile.add_point(40.0, 1200);
        let id = profile.add_point(60.0, 1800);
        let temps: Vec<f64> = profile.points.iter().map(|p| p.temperature).collect();
        assert_eq!(temps, vec![40.0, 60.0, 80.0]);

        // moving a point re-sorts
        assert!(profile.update_point(id, 90.0, 3000));
        let temps: Vec<f64> = profile.points.iter().map(|p| p.temperature).collect();
        assert_eq!(temps, vec![40.0, 80.0, 90.0]);
    }

    #[test]
    fn profile_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("standard.json");
        let mut profile = CurveProfile::standard();
        profile.description = Some("desktop default".to_string());
        profile.save_to_file(&path).unwrap();

        let loaded = CurveProfile::load_from_file(&path).unwrap();
        assert_eq!(loaded.id, profile.id);
        assert_eq!(loaded.name, profile.name);
        assert_eq!(loaded.points.len(), profile.points.len());
        assert_eq!(loaded.description.as_deref(), Some("desktop default"));
        assert_eq!(loaded.interpolate_fan_speed(70.0), 2150);
        // ids are reassigned on load and usable for edits
        assert!(loaded.points.iter().all(|p| p.id > 0));
    }

    #[test]
    fn persisted_shape_uses_camel_case_fields() {
        let json = serde_json::to_string(&CurveProfile::standard()).unwrap();
        assert!(json.contains("\"isActive\""));
        assert!(json.contains("\"createdAt\""));
        assert!(json.contains("\"updatedAt\""));
        assert!(json.contains("\"fanSpeed\""));
        assert!(!json.contains("\"fan_speed\""));
    }
}
