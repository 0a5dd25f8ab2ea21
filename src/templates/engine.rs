//! Handlebars rendering with the `title` helper the import templates use.

use std::sync::LazyLock;

use handlebars::{handlebars_helper, Handlebars};
use serde_json::Value;

use crate::error::{BuildError, Result};

handlebars_helper!(title: |s: str| title_case(s));

static REGISTRY: LazyLock<Handlebars<'static>> = LazyLock::new(|| {
    let mut registry = Handlebars::new();
    registry.register_helper("title", Box::new(title));
    registry
});

/// Capitalise each space-separated word, lowercasing the rest.
pub fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Merge `data` into `template`.
pub fn merge(template: &str, data: &Value) -> Result<String> {
    REGISTRY
        .render_template(template, data)
        .map_err(|e| BuildError::Template(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn variables_are_escaped_unless_triple_braced() {
        let out = merge("{{a}} / {{{a}}}", &json!({ "a": "<b>'x'</b>" })).unwrap();
        assert_eq!(out, "&lt;b&gt;&#x27;x&#x27;&lt;/b&gt; / <b>'x'</b>");
    }

    #[test]
    fn missing_values_render_empty() {
        assert_eq!(merge("[{{nope.deeper}}]", &json!({})).unwrap(), "[]");
    }

    #[test]
    fn each_iterates_with_this_and_index() {
        let data = json!({ "parsers": [
            { "block": "metadata", "path": "./parsers/metadata.js" },
            { "block": "hero", "path": "./parsers/hero.js" },
        ]});
        let out = merge(
            "{{#each parsers}}{{@index}}:{{this.block}}={{{path}}};{{/each}}",
            &data,
        )
        .unwrap();
        assert_eq!(out, "0:metadata=./parsers/metadata.js;1:hero=./parsers/hero.js;");
    }

    #[test]
    fn each_over_object_exposes_key() {
        let out = merge(
            "{{#each files}}{{@key}}={{this}};{{/each}}",
            &json!({ "files": { "a": "1" } }),
        )
        .unwrap();
        assert_eq!(out, "a=1;");
    }

    #[test]
    fn missing_field_inside_each_does_not_fall_back_to_outer_scope() {
        let data = json!({ "name": "ROOT", "items": [{}] });
        assert_eq!(merge("{{#each items}}[{{name}}]{{/each}}", &data).unwrap(), "[]");
        let out = merge("{{#each items}}[{{../name}}]{{/each}}", &data).unwrap();
        assert_eq!(out, "[ROOT]");
    }

    #[test]
    fn whitespace_control_trims_around_tag() {
        assert_eq!(merge("x {{~name~}} y", &json!({ "name": "h" })).unwrap(), "xhy");
    }

    #[test]
    fn if_else_branches() {
        let tpl = "{{#if items}}some{{else}}none{{/if}}";
        assert_eq!(merge(tpl, &json!({ "items": [1] })).unwrap(), "some");
        assert_eq!(merge(tpl, &json!({ "items": [] })).unwrap(), "none");
    }

    #[test]
    fn title_helper() {
        assert_eq!(merge("{{title name}}", &json!({ "name": "hero BANNER" })).unwrap(), "Hero Banner");
        assert_eq!(title_case("cards grid"), "Cards Grid");
    }

    #[test]
    fn unbalanced_blocks_fail() {
        assert!(matches!(merge("{{#each items}}x", &json!({})), Err(BuildError::Template(_))));
        assert!(merge("x{{/if}}", &json!({})).is_err());
    }

    #[test]
    fn comments_are_dropped() {
        assert_eq!(merge("a{{! note }}b", &json!({})).unwrap(), "ab");
    }
}
