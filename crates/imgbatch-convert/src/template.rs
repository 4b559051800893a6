//! Variable substitution for converter argument templates.

use std::collections::HashMap;

use imgbatch_common::paths::file_stem;
use imgbatch_common::ConversionRequest;

/// Variable substitution context for converter arguments.
///
/// Supports variable substitution in strings using the `{varname}` syntax.
/// Substitution is a single pass: text inserted for a variable is never
/// scanned again, so a client filename containing `{quality}` stays literal.
/// Unknown variables are left untouched.
///
/// # Example
///
/// ```
/// use imgbatch_common::{ConversionRequest, Quality, TargetFormat};
/// use imgbatch_convert::TemplateContext;
///
/// let request = ConversionRequest::new(TargetFormat::Webp, Quality::new(75).unwrap());
/// let ctx = TemplateContext::new()
///     .with_request(request)
///     .with_input_name("uploads/cat.heic");
///
/// assert_eq!(ctx.substitute("{format}:-"), "webp:-");
/// assert_eq!(ctx.substitute("{filestem}.{extension}"), "cat.webp");
/// ```
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    vars: HashMap<String, String>,
}

impl TemplateContext {
    /// Create a new empty template context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set request-related variables.
    ///
    /// This adds the following variables:
    /// - `{format}` - Converter coder name (`jpeg`, `png`, `webp`)
    /// - `{quality}` - Encoder quality, 1 to 100
    /// - `{extension}` - Output file extension without the dot
    pub fn with_request(mut self, request: ConversionRequest) -> Self {
        self.set("format", request.format.coder());
        self.set("quality", &request.quality.to_string());
        self.set("extension", request.format.extension());
        self
    }

    /// Set input-related variables.
    ///
    /// This adds the following variables:
    /// - `{filename}` - The uploaded filename as supplied
    /// - `{filestem}` - Its last path component without extension
    pub fn with_input_name(mut self, filename: &str) -> Self {
        self.set("filename", filename);
        self.set("filestem", file_stem(filename));
        self
    }

    /// Add a custom variable.
    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.set(key, value);
        self
    }

    /// Set a variable.
    pub fn set(&mut self, key: &str, value: &str) {
        self.vars.insert(key.to_string(), value.to_string());
    }

    /// Get a variable value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(|s| s.as_str())
    }

    /// Substitute variables in a string.
    pub fn substitute(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) => {
                    let key = &after[..close];
                    match self.vars.get(key) {
                        Some(value) => out.push_str(value),
                        None => {
                            out.push('{');
                            out.push_str(key);
                            out.push('}');
                        }
                    }
                    rest = &after[close + 1..];
                }
                None => {
                    out.push_str(&rest[open..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }

    /// Substitute variables in a list of strings.
    pub fn substitute_all(&self, templates: &[String]) -> Vec<String> {
        templates.iter().map(|t| self.substitute(t)).collect()
    }
}
