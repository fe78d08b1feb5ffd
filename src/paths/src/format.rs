use std::fmt;

/// Line-protocol flavour used for default paths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// `name.label.value` nodes
    #[default]
    Carbon,
    /// Graphite tags: `name;label=value`
    CarbonTags,
    /// OpenMetrics-style braces: `name{label="value"}`
    CarbonOpenMetrics,
}

impl Format {
    /// Select the format from the configuration switches. OpenMetrics wins
    /// when both are set.
    pub fn from_flags(enable_tags: bool, openmetrics: bool) -> Self {
        if openmetrics {
            Self::CarbonOpenMetrics
        } else if enable_tags {
            Self::CarbonTags
        } else {
            Self::Carbon
        }
    }

    /// Whether labels are carried as tags rather than path nodes
    pub fn is_tagged(&self) -> bool {
        !matches!(self, Self::Carbon)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Carbon => write!(f, "carbon"),
            Self::CarbonTags => write!(f, "carbon-tags"),
            Self::CarbonOpenMetrics => write!(f, "carbon-openmetrics"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(Format::from_flags(false, false), Format::Carbon);
        assert_eq!(Format::from_flags(true, false), Format::CarbonTags);
        assert_eq!(Format::from_flags(false, true), Format::CarbonOpenMetrics);
        assert_eq!(Format::from_flags(true, true), Format::CarbonOpenMetrics);
    }

    #[test]
    fn test_format_display() {
        assert_eq!(format!("{}", Format::Carbon), "carbon");
        assert_eq!(format!("{}", Format::CarbonTags), "carbon-tags");
        assert!(!Format::Carbon.is_tagged());
        assert!(Format::CarbonOpenMetrics.is_tagged());
    }
}
