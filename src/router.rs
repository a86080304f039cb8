//! Topic routing
//!
//! Decides per (topic, frame) whether the frame passes through untouched or
//! is routed to recognition. Exclusion wins over everything, the frame's own
//! skip flag wins over the inclusion pattern, and the pattern only gates
//! topics that survived the first two checks.

use regex::Regex;
use std::collections::HashSet;

use crate::config::StageConfig;
use crate::frame::FrameMeta;

/// Routing decision for one (topic, frame) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Forward unchanged, no recognition, no output record
    PassThrough,
    /// Hand to the recognition processor
    Recognize,
}

/// Per-tick topic router
#[derive(Debug, Clone)]
pub struct TopicRouter {
    exclude: HashSet<String>,
    include: Option<Regex>,
}

impl TopicRouter {
    /// Create a router from an exclusion set and an optional inclusion pattern
    pub fn new(exclude: HashSet<String>, include: Option<Regex>) -> Self {
        Self { exclude, include }
    }

    /// Build the router from normalized stage configuration
    pub fn from_config(config: &StageConfig) -> Self {
        Self::new(config.exclude_topics.clone(), config.topic_pattern.clone())
    }

    /// Decide the route for one topic/frame pair
    pub fn route(&self, topic: &str, meta: &FrameMeta) -> Route {
        if self.exclude.contains(topic) {
            return Route::PassThrough;
        }
        if meta.skips_ocr() {
            return Route::PassThrough;
        }
        if let Some(pattern) = &self.include {
            if !pattern.is_match(topic) {
                return Route::PassThrough;
            }
        }
        Route::Recognize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StageOptions;

    fn router(exclude: &[&str], pattern: Option<&str>) -> TopicRouter {
        let temp_dir = tempfile::tempdir().unwrap();
        let options = StageOptions {
            exclude_topics: exclude.iter().map(|s| s.to_string()).collect(),
            topic_pattern: pattern.map(|s| s.to_string()),
            output_path: temp_dir.path().join("results.json"),
            ..StageOptions::default()
        };
        TopicRouter::from_config(&options.normalize().unwrap())
    }

    #[test]
    fn test_default_recognizes_everything_but_main() {
        let r = router(&["main"], None);
        let meta = FrameMeta::default();
        assert_eq!(r.route("main", &meta), Route::PassThrough);
        assert_eq!(r.route("region_0", &meta), Route::Recognize);
        assert_eq!(r.route("anything", &meta), Route::Recognize);
    }

    #[test]
    fn test_exclusion_is_exact_match() {
        let r = router(&["main"], None);
        let meta = FrameMeta::default();
        assert_eq!(r.route("main_2", &meta), Route::Recognize);
        assert_eq!(r.route("mai", &meta), Route::Recognize);
    }

    #[test]
    fn test_skip_flag_forces_pass_through() {
        let r = router(&[], None);
        assert_eq!(
            r.route("region_0", &FrameMeta::default().skip_ocr(true)),
            Route::PassThrough
        );
        assert_eq!(
            r.route("region_0", &FrameMeta::default().skip_ocr(false)),
            Route::Recognize
        );
    }

    #[test]
    fn test_pattern_gates_non_excluded_topics() {
        let r = router(&["main"], Some("region_.*"));
        let meta = FrameMeta::default();
        assert_eq!(r.route("region_0", &meta), Route::Recognize);
        assert_eq!(r.route("region_12", &meta), Route::Recognize);
        assert_eq!(r.route("overview", &meta), Route::PassThrough);
    }

    #[test]
    fn test_pattern_must_match_full_topic() {
        let r = router(&[], Some("region_[0-9]"));
        let meta = FrameMeta::default();
        assert_eq!(r.route("region_1", &meta), Route::Recognize);
        // A substring hit is not enough
        assert_eq!(r.route("region_12", &meta), Route::PassThrough);
        assert_eq!(r.route("xregion_1", &meta), Route::PassThrough);
    }

    #[test]
    fn test_exclusion_beats_pattern() {
        let r = router(&["region_0"], Some("region_.*"));
        let meta = FrameMeta::default();
        assert_eq!(r.route("region_0", &meta), Route::PassThrough);
        assert_eq!(r.route("region_1", &meta), Route::Recognize);
    }

    #[test]
    fn test_skip_flag_beats_pattern() {
        let r = router(&[], Some("region_.*"));
        assert_eq!(
            r.route("region_0", &FrameMeta::default().skip_ocr(true)),
            Route::PassThrough
        );
    }
}
