// SPDX-FileCopyrightText: © 2023 Technical University of Munich, Chair of Connected Mobility
// SPDX-FileCopyrightText: © 2023 Claudio Cicconetti <c.cicconetti@iit.cnr.it>
// SPDX-License-Identifier: MIT

use crate::errors::{BindError, FormatError};

/// Token name to concrete value.
pub type TokenValues = std::collections::BTreeMap<String, String>;

const MAX_BLOB_NAME_LENGTH: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Literal(String),
    Token(String),
}

/// A string with `{token}` placeholders, e.g., `input/{name}.txt`.
///
/// Tokens are unique within a template and two tokens are always separated
/// by at least one literal character, so that matching is unambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PathTemplate {
    raw: String,
    segments: Vec<PathSegment>,
}

impl PathTemplate {
    /// Parse a blob path template `container/blob-name-pattern`.
    ///
    /// The container segment must be a fully literal, valid container name;
    /// only the blob name may contain tokens.
    pub fn parse(raw: &str) -> Result<Self, FormatError> {
        let template = Self::parse_pattern(raw)?;
        let (container, blob_name) = match raw.split_once('/') {
            Some((container, blob_name)) => (container, Some(blob_name)),
            None => (raw, None),
        };
        if container.contains('{') || container.contains('}') {
            return Err(FormatError::TokenInContainerName(container.to_string()));
        }
        validate_container_name(container)?;
        if let Some(blob_name) = blob_name {
            validate_blob_name_pattern(blob_name)?;
        }
        Ok(template)
    }

    /// Parse a generic template without any resource-name rules.
    pub fn parse_pattern(raw: &str) -> Result<Self, FormatError> {
        let mut segments = vec![];
        let mut literal = String::new();
        let mut chars = raw.char_indices();
        while let Some((position, c)) = chars.next() {
            match c {
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        match c {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' => break,
                            _ => name.push(c),
                        }
                    }
                    if !closed {
                        return Err(FormatError::UnterminatedToken {
                            template: raw.to_string(),
                            position,
                        });
                    }
                    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
                        return Err(FormatError::InvalidTokenName {
                            template: raw.to_string(),
                            name,
                        });
                    }
                    if segments.iter().any(|s| matches!(s, PathSegment::Token(t) if *t == name)) {
                        return Err(FormatError::DuplicateToken {
                            template: raw.to_string(),
                            name,
                        });
                    }
                    if !literal.is_empty() {
                        segments.push(PathSegment::Literal(std::mem::take(&mut literal)));
                    } else if matches!(segments.last(), Some(PathSegment::Token(_))) {
                        return Err(FormatError::AdjacentTokens { template: raw.to_string() });
                    }
                    segments.push(PathSegment::Token(name));
                }
                '}' => {
                    return Err(FormatError::UnexpectedClosingBrace {
                        template: raw.to_string(),
                        position,
                    })
                }
                _ => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(PathSegment::Literal(literal));
        }
        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// Extract the token values from a concrete path.
    ///
    /// Matching proceeds right to left: literals must match exactly and each
    /// token takes everything after the rightmost occurrence of the literal
    /// preceding it. A token that follows the
    /// leading literal (e.g., the container) takes everything after that
    /// prefix, and a token at the very start takes all that is left.
    pub fn match_path(&self, path: &str) -> Option<TokenValues> {
        let mut values = TokenValues::new();
        let mut remaining = path;
        for (i, segment) in self.segments.iter().enumerate().rev() {
            match segment {
                PathSegment::Literal(literal) => {
                    remaining = remaining.strip_suffix(literal.as_str())?;
                }
                PathSegment::Token(name) => {
                    let split = match i.checked_sub(1).map(|prev| (prev, &self.segments[prev])) {
                        None => 0,
                        Some((0, PathSegment::Literal(prefix))) => {
                            remaining.strip_prefix(prefix.as_str())?;
                            prefix.len()
                        }
                        Some((_, PathSegment::Literal(prev))) => remaining.rfind(prev.as_str())? + prev.len(),
                        Some((_, PathSegment::Token(_))) => return None,
                    };
                    values.insert(name.clone(), remaining[split..].to_string());
                    remaining = &remaining[..split];
                }
            }
        }
        remaining.is_empty().then_some(values)
    }

    /// Substitute the token values into the template.
    pub fn bind(&self, values: &TokenValues) -> Result<String, BindError> {
        let mut path = String::with_capacity(self.raw.len());
        for segment in &self.segments {
            match segment {
                PathSegment::Literal(literal) => path.push_str(literal),
                PathSegment::Token(name) => match values.get(name) {
                    Some(value) => path.push_str(value),
                    None => {
                        return Err(BindError::MissingToken {
                            token: name.clone(),
                            template: self.raw.clone(),
                        })
                    }
                },
            }
        }
        Ok(path)
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            PathSegment::Token(name) => Some(name.as_str()),
            PathSegment::Literal(_) => None,
        })
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn is_literal(&self) -> bool {
        self.tokens().next().is_none()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Container segment of a blob path template.
    pub fn container_name(&self) -> &str {
        match self.raw.split_once('/') {
            Some((container, _)) => container,
            None => &self.raw,
        }
    }

    /// Literal prefix of the blob name, usable as a listing prefix.
    pub fn blob_name_prefix(&self) -> &str {
        let blob_name = match self.raw.split_once('/') {
            Some((_, blob_name)) => blob_name,
            None => "",
        };
        match blob_name.find('{') {
            Some(pos) => &blob_name[..pos],
            None => blob_name,
        }
    }
}

impl std::fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl TryFrom<String> for PathTemplate {
    type Error = FormatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse_pattern(&value)
    }
}

impl From<PathTemplate> for String {
    fn from(value: PathTemplate) -> Self {
        value.raw
    }
}

fn check_resource_name(name: &str) -> Result<(), String> {
    if let Some(c) = name.chars().find(|c| c.is_ascii_uppercase()) {
        return Err(format!("uppercase letter '{}' is not allowed", c));
    }
    if let Some(c) = name.chars().find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')) {
        return Err(format!("illegal character '{}'", c));
    }
    if name.len() < 3 || name.len() > 63 {
        return Err("length must be between 3 and 63 characters".to_string());
    }
    if name.starts_with('-') || name.ends_with('-') || name.contains("--") {
        return Err("hyphens must separate letters or digits".to_string());
    }
    Ok(())
}

/// Container names are lowercase letters, digits and single hyphens.
pub fn validate_container_name(name: &str) -> Result<(), FormatError> {
    check_resource_name(name).map_err(|reason| FormatError::InvalidContainerName {
        name: name.to_string(),
        reason,
    })
}

/// Queue names follow the same rules as container names.
pub fn validate_queue_name(name: &str) -> Result<(), FormatError> {
    check_resource_name(name).map_err(|reason| FormatError::InvalidQueueName {
        name: name.to_string(),
        reason,
    })
}

/// Check the literal characters of a queue name template.
pub fn validate_queue_name_pattern(template: &PathTemplate) -> Result<(), FormatError> {
    if template.is_literal() {
        return validate_queue_name(template.as_str());
    }
    for segment in template.segments() {
        if let PathSegment::Literal(literal) = segment {
            if let Some(c) = literal.chars().find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')) {
                return Err(FormatError::InvalidQueueName {
                    name: template.as_str().to_string(),
                    reason: format!("illegal character '{}'", c),
                });
            }
        }
    }
    Ok(())
}

fn validate_blob_name_pattern(blob_name: &str) -> Result<(), FormatError> {
    let reason = if blob_name.is_empty() {
        Some("must not be empty".to_string())
    } else if blob_name.len() > MAX_BLOB_NAME_LENGTH {
        Some(format!("longer than {} characters", MAX_BLOB_NAME_LENGTH))
    } else if blob_name.contains('\\') {
        Some("backslash is not allowed".to_string())
    } else {
        None
    };
    match reason {
        Some(reason) => Err(FormatError::InvalidBlobName {
            name: blob_name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Check a concrete blob name.
pub fn validate_blob_name(blob_name: &str) -> Result<(), FormatError> {
    validate_blob_name_pattern(blob_name)
}

#[cfg(test)]
mod test {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> TokenValues {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_parse_segments() {
        let template = PathTemplate::parse("input/{name}.{ext}").unwrap();
        assert_eq!(
            vec![
                PathSegment::Literal("input/".to_string()),
                PathSegment::Token("name".to_string()),
                PathSegment::Literal(".".to_string()),
                PathSegment::Token("ext".to_string()),
            ],
            template.segments()
        );
        assert_eq!(vec!["name", "ext"], template.tokens().collect::<Vec<_>>());
        assert_eq!("input", template.container_name());
        assert_eq!("", template.blob_name_prefix());

        let literal = PathTemplate::parse("input/fixed.txt").unwrap();
        assert!(literal.is_literal());
        assert_eq!("fixed.txt", literal.blob_name_prefix());
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            PathTemplate::parse("input/{name"),
            Err(FormatError::UnterminatedToken { position: 6, .. })
        ));
        assert!(matches!(
            PathTemplate::parse("input/name}"),
            Err(FormatError::UnexpectedClosingBrace { .. })
        ));
        assert!(matches!(PathTemplate::parse("input/{}"), Err(FormatError::InvalidTokenName { .. })));
        assert!(matches!(
            PathTemplate::parse("input/{a}-{a}"),
            Err(FormatError::DuplicateToken { .. })
        ));
        assert!(matches!(PathTemplate::parse("input/{a}{b}"), Err(FormatError::AdjacentTokens { .. })));
        assert!(matches!(
            PathTemplate::parse("Container-Name/blob"),
            Err(FormatError::InvalidContainerName { .. })
        ));
        assert!(matches!(
            PathTemplate::parse("input[1]/blob"),
            Err(FormatError::InvalidContainerName { .. })
        ));
        assert!(matches!(
            PathTemplate::parse("in\\put/blob"),
            Err(FormatError::InvalidContainerName { .. })
        ));
        assert!(matches!(
            PathTemplate::parse("{container}/blob"),
            Err(FormatError::TokenInContainerName(_))
        ));
        assert!(matches!(
            PathTemplate::parse("in{x}put/blob"),
            Err(FormatError::TokenInContainerName(_))
        ));
        assert!(matches!(PathTemplate::parse("input/a\\b"), Err(FormatError::InvalidBlobName { .. })));
        assert!(matches!(PathTemplate::parse("ab/blob"), Err(FormatError::InvalidContainerName { .. })));
    }

    #[test]
    fn test_container_names_with_uppercase_or_braces_never_parse() {
        for raw in ["Input/x", "inPut/{a}", "INPUT", "in}put/x", "{in}/x", "a{b/x"] {
            assert!(PathTemplate::parse(raw).is_err(), "{} parsed", raw);
        }
    }

    #[test]
    fn test_match() {
        let template = PathTemplate::parse("input/{name}.out.txt").unwrap();
        assert_eq!(Some(values(&[("name", "a.b")])), template.match_path("input/a.b.out.txt"));
        assert_eq!(None, template.match_path("other/a.out.txt"));
        assert_eq!(None, template.match_path("input/a.txt"));

        let template = PathTemplate::parse("input/{a}-{b}.txt").unwrap();
        assert_eq!(
            Some(values(&[("a", "x-y"), ("b", "z")])),
            template.match_path("input/x-y-z.txt")
        );

        let template = PathTemplate::parse("input/{a}ab{b}").unwrap();
        assert_eq!(
            Some(values(&[("a", "X"), ("b", "YbZ")])),
            template.match_path("input/XabYbZ")
        );
        assert_eq!(None, template.match_path("input/XaYbZ"));

        let template = PathTemplate::parse("input/{name}").unwrap();
        assert_eq!(Some(values(&[("name", "dir/file")])), template.match_path("input/dir/file"));

        let template = PathTemplate::parse_pattern("{prefix}-done").unwrap();
        assert_eq!(Some(values(&[("prefix", "job-1")])), template.match_path("job-1-done"));

        let literal = PathTemplate::parse("input/fixed.txt").unwrap();
        assert_eq!(Some(TokenValues::new()), literal.match_path("input/fixed.txt"));
        assert_eq!(None, literal.match_path("input/fixed.txt2"));
    }

    #[test]
    fn test_bind() {
        let template = PathTemplate::parse("output/{name}.{ext}").unwrap();
        assert_eq!(
            "output/report.csv",
            template.bind(&values(&[("name", "report"), ("ext", "csv"), ("extra", "x")])).unwrap()
        );
        match template.bind(&values(&[("name", "report")])) {
            Err(BindError::MissingToken { token, template }) => {
                assert_eq!("ext", token);
                assert_eq!("output/{name}.{ext}", template);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_match_then_bind_round_trip() {
        let cases = [
            ("input/{name}.out.txt", "input/a.b.c.out.txt"),
            ("input/{a}-{b}.txt", "input/1-2-3-4.txt"),
            ("input/{name}", "input/"),
            ("input/{year}/{month}/{file}", "input/2024/05/x/y.json"),
            ("input/x{n}y", "input/xxyyy"),
            ("input/{a}ab{b}", "input/XabYbZ"),
            ("input/{a}.tmp/{b}.txt", "input/one.tmp/two.t/three.txt"),
            ("input/fixed", "input/fixed"),
        ];
        for (raw, path) in cases {
            let template = PathTemplate::parse(raw).unwrap();
            let tokens = template.match_path(path).unwrap_or_else(|| panic!("{} did not match {}", raw, path));
            assert_eq!(path, template.bind(&tokens).unwrap());
        }
    }

    #[test]
    fn test_serde_as_string() {
        let template = PathTemplate::parse("input/{name}").unwrap();
        let json = serde_json::to_string(&template).unwrap();
        assert_eq!("\"input/{name}\"", json);
        assert_eq!(template, serde_json::from_str::<PathTemplate>(&json).unwrap());
        assert!(serde_json::from_str::<PathTemplate>("\"input/{name\"").is_err());
    }

    #[test]
    fn test_queue_names() {
        assert!(validate_queue_name("orders-in").is_ok());
        assert!(validate_queue_name("Orders").is_err());
        assert!(validate_queue_name("a--b").is_err());
        assert!(validate_queue_name_pattern(&PathTemplate::parse_pattern("out-{name}").unwrap()).is_ok());
        assert!(validate_queue_name_pattern(&PathTemplate::parse_pattern("Out-{name}").unwrap()).is_err());
    }
}
