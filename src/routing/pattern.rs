use anyhow::Result;
use percent_encoding::percent_decode_str;
use std::collections::HashMap;

/// Captured parameters for a matched path. The rest-wildcard binds the joined
/// remainder under this reserved key.
pub const REST_KEY: &str = "**";

/// One compiled path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Lowercased literal, compared case-insensitively.
    Literal(String),
    /// Named capture (`:name` or `{name}`).
    Param(String),
    /// `*` — exactly one path component.
    Wildcard,
    /// `**` — zero or more components, only valid in final position.
    Rest,
}

/// A path pattern compiled once at table construction so the hot path does
/// no string splitting beyond the request path itself.
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
    priority: i32,
    has_rest: bool,
    /// `/a/b`-style join of the leading literal run, used by strip_path.
    literal_prefix: String,
}

impl PathPattern {
    pub fn compile(pattern: &str) -> Result<Self> {
        let trimmed = pattern.trim_matches('/');
        let mut segments: Vec<Segment> = Vec::new();

        if !trimmed.is_empty() {
            for token in trimmed.split('/') {
                if segments.last() == Some(&Segment::Rest) {
                    anyhow::bail!("pattern {pattern:?}: `**` must be the final segment");
                }
                let segment = match token {
                    "**" => Segment::Rest,
                    "*" => Segment::Wildcard,
                    _ if token.starts_with(':') => {
                        let name = &token[1..];
                        if name.is_empty() {
                            anyhow::bail!("pattern {pattern:?}: empty parameter name");
                        }
                        Segment::Param(name.to_string())
                    }
                    _ if token.starts_with('{') && token.ends_with('}') => {
                        let name = &token[1..token.len() - 1];
                        if name.is_empty() {
                            anyhow::bail!("pattern {pattern:?}: empty parameter name");
                        }
                        Segment::Param(name.to_string())
                    }
                    "" => anyhow::bail!("pattern {pattern:?}: empty segment"),
                    _ => Segment::Literal(token.to_ascii_lowercase()),
                };
                segments.push(segment);
            }
        }

        let priority = compute_priority(&segments);
        let has_rest = segments.last() == Some(&Segment::Rest);
        let literal_prefix = leading_literal_run(&segments);

        Ok(Self {
            raw: pattern.to_string(),
            segments,
            priority,
            has_rest,
            literal_prefix,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn has_rest(&self) -> bool {
        self.has_rest
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Walk segments and path components in lockstep. Returns the capture
    /// map on success; `None` when the path does not match or is not fully
    /// consumed.
    pub fn match_path(&self, path: &str) -> Option<HashMap<String, String>> {
        let components: Vec<&str> = path
            .split('/')
            .filter(|c| !c.is_empty())
            .collect();

        let mut params = HashMap::new();
        let mut idx = 0;

        for segment in &self.segments {
            match segment {
                Segment::Literal(lit) => {
                    let component = components.get(idx)?;
                    if !component.eq_ignore_ascii_case(lit) {
                        return None;
                    }
                    idx += 1;
                }
                Segment::Param(name) => {
                    let component = components.get(idx)?;
                    params.insert(name.clone(), decode_component(component));
                    idx += 1;
                }
                Segment::Wildcard => {
                    if idx >= components.len() {
                        return None;
                    }
                    idx += 1;
                }
                Segment::Rest => {
                    params.insert(REST_KEY.to_string(), components[idx..].join("/"));
                    return Some(params);
                }
            }
        }

        if idx == components.len() {
            Some(params)
        } else {
            None
        }
    }

    /// Remove the longest leading literal run from `path` for forwarding.
    /// Returns `/` when the whole path was literal prefix.
    pub fn strip_literal_prefix<'a>(&self, path: &'a str) -> &'a str {
        if self.literal_prefix.is_empty() {
            return path;
        }
        let prefix_len = self.literal_prefix.len();
        if path.len() >= prefix_len
            && path.as_bytes()[..prefix_len].eq_ignore_ascii_case(self.literal_prefix.as_bytes())
        {
            if let Some(remainder) = path.get(prefix_len..) {
                if remainder.is_empty() {
                    return "/";
                }
                return remainder;
            }
        }
        path
    }
}

/// `10·S + Σ bonus`: literals +3, parameters −2, wildcards −5. More specific
/// patterns shadow less specific siblings; rest-wildcards are last resort.
fn compute_priority(segments: &[Segment]) -> i32 {
    let mut priority = 10 * segments.len() as i32;
    for segment in segments {
        priority += match segment {
            Segment::Literal(_) => 3,
            Segment::Param(_) => -2,
            Segment::Wildcard | Segment::Rest => -5,
        };
    }
    priority
}

fn leading_literal_run(segments: &[Segment]) -> String {
    let mut prefix = String::new();
    for segment in segments {
        match segment {
            Segment::Literal(lit) => {
                prefix.push('/');
                prefix.push_str(lit);
            }
            _ => break,
        }
    }
    prefix
}

fn decode_component(component: &str) -> String {
    percent_decode_str(component)
        .decode_utf8()
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| component.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(p: &str) -> PathPattern {
        PathPattern::compile(p).unwrap()
    }

    #[test]
    fn test_compile_segment_kinds() {
        let p = compile("/api/:version/{user}/*/rest/**");
        assert_eq!(
            p.segments(),
            &[
                Segment::Literal("api".into()),
                Segment::Param("version".into()),
                Segment::Param("user".into()),
                Segment::Wildcard,
                Segment::Literal("rest".into()),
                Segment::Rest,
            ]
        );
        assert!(p.has_rest());
    }

    #[test]
    fn test_rest_must_be_final() {
        assert!(PathPattern::compile("/api/**/users").is_err());
    }

    #[test]
    fn test_empty_param_name_rejected() {
        assert!(PathPattern::compile("/api/:").is_err());
        assert!(PathPattern::compile("/api/{}").is_err());
    }

    #[test]
    fn test_priority_formula() {
        // 3 literals: 30 + 9
        assert_eq!(compile("/api/v1/users").priority(), 39);
        // 3 literals + wildcard: 40 + 9 - 5
        assert_eq!(compile("/api/v1/users/*").priority(), 44);
        // 3 literals + param: 40 + 9 - 2
        assert_eq!(compile("/api/v1/orders/:id").priority(), 42);
        // literal + rest: 20 + 3 - 5
        assert_eq!(compile("/api/**").priority(), 18);
    }

    #[test]
    fn test_literal_match_case_insensitive() {
        let p = compile("/API/Users");
        assert!(p.match_path("/api/users").is_some());
        assert!(p.match_path("/Api/USERS").is_some());
        assert!(p.match_path("/api/other").is_none());
    }

    #[test]
    fn test_full_consumption_required() {
        let p = compile("/api/users");
        assert!(p.match_path("/api/users/123").is_none());
        assert!(p.match_path("/api").is_none());
        assert!(p.match_path("/api/users/").is_some());
    }

    #[test]
    fn test_param_capture_decoded() {
        let p = compile("/users/:name");
        let params = p.match_path("/users/jane%20doe").unwrap();
        assert_eq!(params["name"], "jane doe");
    }

    #[test]
    fn test_wildcard_needs_a_component() {
        let p = compile("/files/*");
        assert!(p.match_path("/files/a").is_some());
        assert!(p.match_path("/files").is_none());
        assert!(p.match_path("/files/a/b").is_none());
    }

    #[test]
    fn test_rest_binds_remainder() {
        let p = compile("/api/**");
        let params = p.match_path("/api/v1/users/123").unwrap();
        assert_eq!(params[REST_KEY], "v1/users/123");

        // Zero remaining components also match.
        let params = p.match_path("/api").unwrap();
        assert_eq!(params[REST_KEY], "");
    }

    #[test]
    fn test_root_pattern_matches_root_only() {
        let p = compile("/");
        assert!(p.match_path("/").is_some());
        assert!(p.match_path("/x").is_none());
    }

    #[test]
    fn test_compile_idempotent_over_slashes() {
        // Structural equivalence regardless of slash decoration.
        let a = compile("/api/v1/users/");
        let b = compile("api/v1/users");
        assert_eq!(a.segments(), b.segments());
        assert_eq!(a.priority(), b.priority());
    }

    #[test]
    fn test_strip_literal_prefix() {
        let p = compile("/api/v1/users/:id");
        assert_eq!(p.strip_literal_prefix("/api/v1/users/42"), "/42");
        assert_eq!(p.strip_literal_prefix("/api/v1/users"), "/");
        // Non-literal head means nothing is stripped.
        let p = compile("/:tenant/api");
        assert_eq!(p.strip_literal_prefix("/acme/api"), "/acme/api");
    }
}
