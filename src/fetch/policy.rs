//! Retry and refresh timing.

use rand::Rng;
use std::time::Duration;

use crate::cache::CachedResponse;
use crate::config::FetchConfig;
use crate::error::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
  Retry,
  Cooldown,
}

/// What to do after a failed attempt.
///
/// Statuses listed in `avoid_retries_for_status_codes` skip straight to
/// cooldown, but only while online: offline, the status may come from a
/// captive portal rather than the origin.
pub fn decide(config: &FetchConfig, error: &FetchError, offline: bool, retry_count: u32) -> Decision {
  let avoided = error
    .status()
    .is_some_and(|status| config.avoid_retries_for_status_codes.contains(&status));

  if avoided && !offline {
    Decision::Cooldown
  } else if retry_count < config.count {
    Decision::Retry
  } else {
    Decision::Cooldown
  }
}

/// Delay before the next refresh after a response from the network.
pub fn refresh_interval<R: Rng + ?Sized>(config: &FetchConfig, response: &CachedResponse, rng: &mut R) -> Duration {
  if !config.refresh_from_cache_control {
    return config.refresh;
  }

  match response.max_age() {
    Some(max_age) => {
      let spread = u64::try_from(config.cooldown.as_millis()).unwrap_or(u64::MAX);
      let offset = Duration::from_millis(rng.gen_range(0..=spread));
      Duration::from_secs(max_age) + config.refresh_jitter + offset
    }
    None => config.refresh,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rand::rngs::StdRng;
  use rand::SeedableRng;

  fn rejection(status: u16) -> FetchError {
    FetchError::HttpRejection {
      status,
      status_text: String::new(),
      response_text: String::new(),
    }
  }

  fn network() -> FetchError {
    FetchError::Network {
      message: "connection refused".to_string(),
    }
  }

  #[test]
  fn test_retries_until_count_then_cools_down() {
    let config = FetchConfig::default();

    for retry_count in 0..5 {
      assert_eq!(decide(&config, &network(), false, retry_count), Decision::Retry);
    }
    assert_eq!(decide(&config, &network(), false, 5), Decision::Cooldown);
  }

  #[test]
  fn test_avoided_status_cools_down_only_when_online() {
    let config = FetchConfig {
      avoid_retries_for_status_codes: vec![404],
      ..FetchConfig::default()
    };

    assert_eq!(decide(&config, &rejection(404), false, 0), Decision::Cooldown);
    assert_eq!(decide(&config, &rejection(404), true, 0), Decision::Retry);
    assert_eq!(decide(&config, &rejection(500), false, 0), Decision::Retry);
  }

  #[test]
  fn test_zero_count_never_retries() {
    let config = FetchConfig {
      count: 0,
      ..FetchConfig::default()
    };

    assert_eq!(decide(&config, &network(), false, 0), Decision::Cooldown);
  }

  #[test]
  fn test_refresh_interval_defaults_to_configured_refresh() {
    let config = FetchConfig {
      refresh_from_cache_control: true,
      ..FetchConfig::default()
    };
    let response = CachedResponse::new("u", 200);
    let mut rng = StdRng::seed_from_u64(1);

    assert_eq!(refresh_interval(&config, &response, &mut rng), config.refresh);
  }

  #[test]
  fn test_max_age_is_ignored_unless_enabled() {
    let config = FetchConfig::default();
    let response = CachedResponse::new("u", 200).with_header("cache-control", "max-age=30");
    let mut rng = StdRng::seed_from_u64(1);

    assert_eq!(refresh_interval(&config, &response, &mut rng), config.refresh);
  }

  #[test]
  fn test_max_age_interval_stays_within_spread() {
    let config = FetchConfig {
      refresh_from_cache_control: true,
      ..FetchConfig::default()
    };
    let response = CachedResponse::new("u", 200).with_header("Cache-Control", "public, max-age=120");
    let mut rng = StdRng::seed_from_u64(7);

    for _ in 0..50 {
      let interval = refresh_interval(&config, &response, &mut rng);
      assert!(interval >= Duration::from_secs(121));
      assert!(interval <= Duration::from_secs(121) + config.cooldown);
    }
  }

  #[test]
  fn test_max_age_interval_without_cooldown_is_exact() {
    let config = FetchConfig {
      refresh_from_cache_control: true,
      cooldown: Duration::ZERO,
      ..FetchConfig::default()
    };
    let response = CachedResponse::new("u", 200).with_header("cache-control", "max-age=120");
    let mut rng = StdRng::seed_from_u64(7);

    assert_eq!(refresh_interval(&config, &response, &mut rng), Duration::from_secs(121));
  }
}
