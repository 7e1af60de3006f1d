//! CLI command implementations.

pub mod compile;
mod skeleton;
pub mod validate;

use cortex_core::vocabulary::{QualityTier, StakesLevel, ToolsState};

/// Parses a stakes level from CLI input.
pub fn parse_stakes(s: &str) -> anyhow::Result<StakesLevel> {
    match s.to_ascii_uppercase().as_str() {
        "LOW" => Ok(StakesLevel::Low),
        "MEDIUM" => Ok(StakesLevel::Medium),
        "HIGH" => Ok(StakesLevel::High),
        "CRITICAL" => Ok(StakesLevel::Critical),
        other => anyhow::bail!("unknown stakes level: {other}"),
    }
}

/// Parses a quality tier from CLI input.
pub fn parse_tier(s: &str) -> anyhow::Result<QualityTier> {
    match s.to_ascii_uppercase().as_str() {
        "SUBPAR" => Ok(QualityTier::Subpar),
        "PAR" => Ok(QualityTier::Par),
        "SUPERB" => Ok(QualityTier::Superb),
        other => anyhow::bail!("unknown quality tier: {other}"),
    }
}

/// Parses a tools state from CLI input.
pub fn parse_tools_state(s: &str) -> anyhow::Result<ToolsState> {
    match s.to_ascii_lowercase().as_str() {
        "tools_ok" => Ok(ToolsState::ToolsOk),
        "tools_partial" => Ok(ToolsState::ToolsPartial),
        "tools_down" => Ok(ToolsState::ToolsDown),
        other => anyhow::bail!("unknown tools state: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stakes() {
        assert_eq!(parse_stakes("high").unwrap(), StakesLevel::High);
        assert_eq!(parse_stakes("CRITICAL").unwrap(), StakesLevel::Critical);
        assert!(parse_stakes("extreme").is_err());
    }

    #[test]
    fn test_parse_tier() {
        assert_eq!(parse_tier("superb").unwrap(), QualityTier::Superb);
        assert_eq!(parse_tier("PAR").unwrap(), QualityTier::Par);
        assert!(parse_tier("great").is_err());
    }

    #[test]
    fn test_parse_tools_state() {
        assert_eq!(parse_tools_state("TOOLS_OK").unwrap(), ToolsState::ToolsOk);
        assert_eq!(
            parse_tools_state("tools_down").unwrap(),
            ToolsState::ToolsDown
        );
        assert!(parse_tools_state("tools_gone").is_err());
    }
}
