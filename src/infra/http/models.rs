use serde::{Deserialize, Serialize};

use crate::application::render::RenderRequest;

/// Render request carried in a JSON or URL-encoded body.
#[derive(Debug, Deserialize, Serialize)]
pub struct RenderBody {
    #[serde(alias = "dot", alias = "graph")]
    pub source: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub layout: Option<String>,
}

impl From<RenderBody> for RenderRequest {
    fn from(body: RenderBody) -> Self {
        RenderRequest {
            source: body.source,
            format: non_blank(body.format),
            layout: non_blank(body.layout),
            budget: None,
        }
    }
}

/// Selectors accepted in the query string of render endpoints.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RenderQuery {
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub layout: Option<String>,
}

impl RenderQuery {
    /// Fill in selectors the body left unset or blank; the body wins when both are present.
    pub fn apply(self, mut request: RenderRequest) -> RenderRequest {
        request.format = non_blank(request.format).or(non_blank(self.format));
        request.layout = non_blank(request.layout).or(non_blank(self.layout));
        request
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_selectors_win_over_query() {
        let request = RenderRequest::new("digraph{a}").with_format("svg");
        let query = RenderQuery {
            format: Some("png".into()),
            layout: Some("neato".into()),
        };

        let merged = query.apply(request);
        assert_eq!(merged.format.as_deref(), Some("svg"));
        assert_eq!(merged.layout.as_deref(), Some("neato"));
    }

    #[test]
    fn blank_query_values_are_ignored() {
        let query = RenderQuery {
            format: Some("  ".into()),
            layout: None,
        };
        let merged = query.apply(RenderRequest::new("digraph{a}"));
        assert!(merged.format.is_none());
    }

    #[test]
    fn blank_body_values_fall_back_to_query() {
        let body: RenderBody =
            serde_json::from_str(r#"{"source":"digraph{a}","format":"","layout":" "}"#)
                .expect("body");
        let query = RenderQuery {
            format: Some("svg".into()),
            layout: Some("neato".into()),
        };

        let merged = query.apply(RenderRequest::from(body));
        assert_eq!(merged.format.as_deref(), Some("svg"));
        assert_eq!(merged.layout.as_deref(), Some("neato"));
    }

    #[test]
    fn json_body_accepts_dot_alias() {
        let body: RenderBody =
            serde_json::from_str(r#"{"dot":"digraph{a}","format":"svg"}"#).expect("body");
        let request = RenderRequest::from(body);
        assert_eq!(request.source, "digraph{a}");
        assert_eq!(request.format.as_deref(), Some("svg"));
    }
}
