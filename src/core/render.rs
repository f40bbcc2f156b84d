//! Renderer module
//!
//! Renders ResultSet to different output formats: jsonl, json, md

use crate::core::model::{Kind, ResultItem, ResultSet};

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Jsonl,
    Json,
    Markdown,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "jsonl" => Ok(OutputFormat::Jsonl),
            "json" => Ok(OutputFormat::Json),
            "md" | "markdown" => Ok(OutputFormat::Markdown),
            _ => Err(format!("Unknown format: {}", s)),
        }
    }
}

/// Render configuration combining format and options
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderConfig {
    pub format: OutputFormat,
    pub pretty: bool,
}

impl RenderConfig {
    pub fn with_pretty(format: OutputFormat, pretty: bool) -> Self {
        Self { format, pretty }
    }
}

/// Renderer for result sets
pub struct Renderer {
    config: RenderConfig,
}

impl Renderer {
    pub fn with_config(config: RenderConfig) -> Self {
        Self { config }
    }

    /// Render a result set to a string
    pub fn render(&self, result_set: &ResultSet) -> String {
        match self.config.format {
            OutputFormat::Jsonl => self.render_jsonl(result_set),
            OutputFormat::Json => self.render_json(result_set),
            OutputFormat::Markdown => self.render_markdown(result_set),
        }
    }

    /// Render as JSON Lines (one JSON object per line)
    fn render_jsonl(&self, result_set: &ResultSet) -> String {
        result_set
            .items
            .iter()
            .filter_map(|item| {
                if self.config.pretty {
                    serde_json::to_string_pretty(item).ok()
                } else {
                    serde_json::to_string(item).ok()
                }
            })
            .collect::<Vec<_>>()
            .join(if self.config.pretty { "\n\n" } else { "\n" })
    }

    /// Render as a single JSON array
    fn render_json(&self, result_set: &ResultSet) -> String {
        if self.config.pretty {
            serde_json::to_string_pretty(&result_set.items).unwrap_or_else(|_| "[]".to_string())
        } else {
            serde_json::to_string(&result_set.items).unwrap_or_else(|_| "[]".to_string())
        }
    }

    fn render_markdown(&self, result_set: &ResultSet) -> String {
        let mut output = String::new();

        let mut errors = Vec::new();
        let mut versions = Vec::new();
        let mut paths = Vec::new();
        let mut checks = Vec::new();

        for item in &result_set.items {
            match item.kind {
                Kind::Error => errors.push(item),
                Kind::Version => versions.push(item),
                Kind::Path => paths.push(item),
                Kind::Check => checks.push(item),
            }
        }

        if !errors.is_empty() {
            output.push_str("## Errors\n\n");
            for item in errors {
                for error in &item.errors {
                    output.push_str(&format!("- **{}**: {}\n", error.code, error.message));
                }
            }
            output.push('\n');
        }

        if !versions.is_empty() {
            output.push_str("## Versions\n\n");
            for item in versions {
                render_version_md(&mut output, item);
            }
            output.push('\n');
        }

        if !paths.is_empty() {
            output.push_str("## Paths\n\n");
            for item in paths {
                if let Some(path) = &item.path {
                    output.push_str(&format!("- `{}`\n", path));
                }
            }
            output.push('\n');
        }

        if !checks.is_empty() {
            output.push_str("## Checks\n\n");
            for item in checks {
                if let Some(excerpt) = &item.excerpt {
                    output.push_str(&format!("- {}\n", excerpt));
                }
                for error in &item.errors {
                    output.push_str(&format!("  - **{}**: {}\n", error.code, error.message));
                }
            }
            output.push('\n');
        }

        output
    }
}

fn render_version_md(output: &mut String, item: &ResultItem) {
    let module = item.module.as_deref().unwrap_or("?");
    let version = item.version.as_deref().unwrap_or("?");
    let state = match item.found {
        Some(true) => "cached",
        Some(false) => "not cached",
        None => "unknown",
    };
    output.push_str(&format!("- `{}@{}` ({})", module, version, state));
    if let Some(path) = &item.path {
        output.push_str(&format!(" -> `{}`", path));
    }
    output.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::ItemError;

    fn renderer(format: OutputFormat) -> Renderer {
        Renderer::with_config(RenderConfig::with_pretty(format, false))
    }

    #[test]
    fn test_render_jsonl() {
        let mut result_set = ResultSet::new();
        result_set.push(ResultItem::path("github.com/!azure/x"));
        result_set.push(ResultItem::path("golang.org/x/text"));

        let output = renderer(OutputFormat::Jsonl).render(&result_set);

        assert!(output.contains("github.com/!azure/x"));
        assert_eq!(output.lines().count(), 2);
    }

    #[test]
    fn test_render_json() {
        let mut result_set = ResultSet::new();
        result_set.push(ResultItem::version("a.b/c", "v1.0.0", false));

        let output = renderer(OutputFormat::Json).render(&result_set);

        assert!(output.starts_with('['));
        assert!(output.ends_with(']'));
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("jsonl".parse::<OutputFormat>().unwrap(), OutputFormat::Jsonl);
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("md".parse::<OutputFormat>().unwrap(), OutputFormat::Markdown);
        assert!("raw".parse::<OutputFormat>().unwrap_err().contains("Unknown format"));
    }

    #[test]
    fn test_render_json_pretty() {
        let mut result_set = ResultSet::new();
        result_set.push(ResultItem::path("x"));

        let config = RenderConfig::with_pretty(OutputFormat::Json, true);
        let output = Renderer::with_config(config).render(&result_set);

        assert!(output.contains("  "));
    }

    #[test]
    fn test_render_markdown_sections() {
        let mut result_set = ResultSet::new();
        result_set.push(
            ResultItem::version("github.com/a/b", "v0.0.0-20180517173623-c85619274f5d", true)
                .with_path("/cache/github.com/a/b/@v/v0.0.0-20180517173623-c85619274f5d.info"),
        );
        result_set.push(ResultItem::error(ItemError::new("CODEC", "bad")));

        let output = renderer(OutputFormat::Markdown).render(&result_set);

        assert!(output.contains("## Errors"));
        assert!(output.contains("**CODEC**: bad"));
        assert!(output.contains("## Versions"));
        assert!(output.contains("(cached)"));
        assert!(output.contains(".info`"));
    }

    #[test]
    fn test_render_markdown_empty() {
        let output = renderer(OutputFormat::Markdown).render(&ResultSet::new());
        assert!(output.is_empty());
    }
}
