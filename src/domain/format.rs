//! Output formats and layout algorithms understood by the Graphviz engine.

use std::{fmt, str::FromStr};

use super::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Svg,
    Png,
    Pdf,
    Jpeg,
    Gif,
    Webp,
    Json,
    Dot,
    Plain,
    Ps,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 10] = [
        OutputFormat::Svg,
        OutputFormat::Png,
        OutputFormat::Pdf,
        OutputFormat::Jpeg,
        OutputFormat::Gif,
        OutputFormat::Webp,
        OutputFormat::Json,
        OutputFormat::Dot,
        OutputFormat::Plain,
        OutputFormat::Ps,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Svg => "svg",
            OutputFormat::Png => "png",
            OutputFormat::Pdf => "pdf",
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Gif => "gif",
            OutputFormat::Webp => "webp",
            OutputFormat::Json => "json",
            OutputFormat::Dot => "dot",
            OutputFormat::Plain => "plain",
            OutputFormat::Ps => "ps",
        }
    }

    /// Value passed to the engine as `-T<value>`.
    pub fn engine_arg(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            other => other.as_str(),
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Svg => "image/svg+xml",
            OutputFormat::Png => "image/png",
            OutputFormat::Pdf => "application/pdf",
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Gif => "image/gif",
            OutputFormat::Webp => "image/webp",
            OutputFormat::Json => "application/json",
            OutputFormat::Dot => "text/vnd.graphviz",
            OutputFormat::Plain => "text/plain; charset=utf-8",
            OutputFormat::Ps => "application/postscript",
        }
    }

    /// Resolve a caller-supplied selector: a format name (`svg`, `jpg`) or a
    /// media type (`image/svg+xml`, `image/png; q=1`).
    pub fn from_selector(selector: &str) -> Option<Self> {
        let essence = selector
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        let format = match essence.as_str() {
            "svg" | "image/svg+xml" | "image/svg" => OutputFormat::Svg,
            "png" | "image/png" => OutputFormat::Png,
            "pdf" | "application/pdf" => OutputFormat::Pdf,
            "jpeg" | "jpg" | "jpe" | "image/jpeg" | "image/jpg" => OutputFormat::Jpeg,
            "gif" | "image/gif" => OutputFormat::Gif,
            "webp" | "image/webp" => OutputFormat::Webp,
            "json" | "application/json" => OutputFormat::Json,
            "dot" | "gv" | "canon" | "text/vnd.graphviz" => OutputFormat::Dot,
            "plain" | "txt" | "text/plain" => OutputFormat::Plain,
            "ps" | "application/postscript" => OutputFormat::Ps,
            _ => return None,
        };
        Some(format)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::from_selector(value).ok_or_else(|| ValidationError::UnsupportedFormat(value.into()))
    }
}

/// Layout algorithm, passed to the engine as `-K<name>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layout {
    Dot,
    Neato,
    Fdp,
    Sfdp,
    Circo,
    Twopi,
    Osage,
    Patchwork,
}

impl Layout {
    pub const ALL: [Layout; 8] = [
        Layout::Dot,
        Layout::Neato,
        Layout::Fdp,
        Layout::Sfdp,
        Layout::Circo,
        Layout::Twopi,
        Layout::Osage,
        Layout::Patchwork,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Layout::Dot => "dot",
            Layout::Neato => "neato",
            Layout::Fdp => "fdp",
            Layout::Sfdp => "sfdp",
            Layout::Circo => "circo",
            Layout::Twopi => "twopi",
            Layout::Osage => "osage",
            Layout::Patchwork => "patchwork",
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Layout {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Layout::ALL
            .into_iter()
            .find(|layout| layout.as_str() == normalized)
            .ok_or_else(|| ValidationError::UnsupportedLayout(value.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors_accept_names_aliases_and_media_types() {
        assert_eq!(OutputFormat::from_selector("SVG"), Some(OutputFormat::Svg));
        assert_eq!(
            OutputFormat::from_selector("image/svg+xml"),
            Some(OutputFormat::Svg)
        );
        assert_eq!(
            OutputFormat::from_selector("image/png; q=0.9"),
            Some(OutputFormat::Png)
        );
        assert_eq!(OutputFormat::from_selector("jpg"), Some(OutputFormat::Jpeg));
        assert_eq!(OutputFormat::from_selector("gv"), Some(OutputFormat::Dot));
        assert_eq!(OutputFormat::from_selector("bmp"), None);
    }

    #[test]
    fn jpeg_uses_engine_short_name() {
        assert_eq!(OutputFormat::Jpeg.engine_arg(), "jpg");
        assert_eq!(OutputFormat::Svg.engine_arg(), "svg");
    }

    #[test]
    fn unknown_format_reports_the_requested_selector() {
        let err = "image/tiff".parse::<OutputFormat>().unwrap_err();
        assert_eq!(err, ValidationError::UnsupportedFormat("image/tiff".into()));
    }

    #[test]
    fn layouts_parse_case_insensitively() {
        assert_eq!(" Neato ".parse::<Layout>(), Ok(Layout::Neato));
        assert!(matches!(
            "spring".parse::<Layout>(),
            Err(ValidationError::UnsupportedLayout(name)) if name == "spring"
        ));
    }
}
