// src/services/prompt.rs
//! Prompt resolution: color placeholder substitution, reference image
//! selection and collage prompt construction.

use crate::models::{COLLAGE_PREFIX, ColorOption, ReferenceImage};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

pub const MAX_COLLAGE_PANELS: usize = 12;

static COLOR_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\{\{COLOR_(\d+)\}\}").expect("valid placeholder regex"));

/// A prompt ready to be sent to the synthesizer.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPrompt {
    pub text: String,
    pub reference_image: Option<ReferenceImage>,
}

/// Replaces `{{COLOR_n}}` (1-based, case-insensitive) with the name of the
/// n-th color option. Placeholders without a matching option are kept.
pub fn substitute_color_placeholders(prompt: &str, colors: &[ColorOption]) -> String {
    COLOR_PLACEHOLDER
        .replace_all(prompt, |caps: &Captures| {
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|index| colors.get(index))
                .map(|option| option.color_name.clone())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// First color option whose name occurs in the prompt, ignoring case.
pub fn match_color_option<'a>(prompt: &str, colors: &'a [ColorOption]) -> Option<&'a ColorOption> {
    let haystack = prompt.to_lowercase();
    colors.iter().find(|option| {
        let name = option.color_name.trim();
        !name.is_empty() && haystack.contains(&name.to_lowercase())
    })
}

/// Reference image for a resolved prompt: the matched color's first image,
/// otherwise `fallback`.
pub fn select_reference_image<'a>(
    prompt: &str,
    colors: &'a [ColorOption],
    fallback: Option<&'a ReferenceImage>,
) -> Option<&'a ReferenceImage> {
    match_color_option(prompt, colors)
        .and_then(|option| option.images.first())
        .or(fallback)
}

pub fn resolve_prompt(
    raw: &str,
    colors: &[ColorOption],
    fallback: Option<&ReferenceImage>,
) -> ResolvedPrompt {
    let text = substitute_color_placeholders(raw, colors);
    let reference_image = select_reference_image(&text, colors, fallback).cloned();
    ResolvedPrompt {
        text,
        reference_image,
    }
}

/// Number of panels described by a collage code such as `collage-1-3`.
/// Each numeric segment is a row; unparsable codes fall back to 4 panels.
/// The total is capped at [`MAX_COLLAGE_PANELS`].
pub fn collage_panel_count(layout_code: &str) -> usize {
    let grid = layout_code.strip_prefix(COLLAGE_PREFIX).unwrap_or(layout_code);
    let rows: Vec<usize> = grid
        .split('-')
        .filter_map(|segment| segment.parse::<usize>().ok())
        .filter(|&n| n > 0)
        .map(|n| n.min(MAX_COLLAGE_PANELS))
        .collect();

    if rows.is_empty() {
        4
    } else {
        rows.iter()
            .fold(0usize, |acc, &n| acc.saturating_add(n))
            .min(MAX_COLLAGE_PANELS)
    }
}

/// Builds the single prompt for a collage section: one composite image
/// showing the product in several poses or angles. Placeholders still
/// present in either input are dropped.
pub fn build_collage_prompt(
    layout_code: &str,
    product_description: &str,
    section_prompt: Option<&str>,
) -> String {
    let description = strip_placeholders(product_description);
    let subject = match description.trim() {
        "" => "the product",
        description => description,
    };
    let panels = collage_panel_count(layout_code);
    let arrangement = layout_code
        .strip_prefix(COLLAGE_PREFIX)
        .filter(|rest| !rest.is_empty())
        .map(|rest| format!(" arranged in rows of {}", rest.replace('-', ", ")))
        .unwrap_or_default();

    let mut prompt = format!(
        "A single e-commerce collage image composed of {panels} panels{arrangement}. \
         Every panel shows the same product: {subject}. \
         Vary the pose, angle and framing between panels (front, side, detail close-up, in use) \
         while keeping the product's shape, color and materials identical. \
         Clean seamless background, consistent studio lighting, thin even gutters between panels, \
         no text, no watermarks."
    );

    if let Some(extra) = section_prompt.map(strip_placeholders) {
        let extra = extra.trim();
        if !extra.is_empty() {
            prompt.push_str(" Additional direction: ");
            prompt.push_str(extra);
        }
    }

    prompt
}

fn strip_placeholders(text: &str) -> String {
    COLOR_PLACEHOLDER.replace_all(text, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color(name: &str, images: &[&str]) -> ColorOption {
        ColorOption {
            color_name: name.to_string(),
            images: images
                .iter()
                .map(|data| ReferenceImage {
                    data: data.to_string(),
                    mime_type: "image/png".to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn placeholders_resolve_case_insensitively() {
        let colors = vec![color("Navy", &[]), color("Ivory", &[])];
        let out = substitute_color_placeholders("{{color_1}} mug next to a {{COLOR_2}} mug", &colors);
        assert_eq!(out, "Navy mug next to a Ivory mug");
    }

    #[test]
    fn placeholder_without_colors_is_left_alone() {
        let out = substitute_color_placeholders("a {{COLOR_1}} chair", &[]);
        assert_eq!(out, "a {{COLOR_1}} chair");
    }

    #[test]
    fn out_of_range_placeholder_is_left_alone() {
        let colors = vec![color("Red", &[])];
        let out = substitute_color_placeholders("{{COLOR_1}} and {{COLOR_3}} and {{COLOR_0}}", &colors);
        assert_eq!(out, "Red and {{COLOR_3}} and {{COLOR_0}}");
    }

    #[test]
    fn first_matching_color_wins() {
        let colors = vec![color("Blue", &["b"]), color("Sky Blue", &["s"])];
        let matched = match_color_option("a SKY BLUE kettle", &colors).unwrap();
        assert_eq!(matched.color_name, "Blue");
    }

    #[test]
    fn blank_color_names_never_match() {
        let colors = vec![color("  ", &["x"]), color("Green", &["g"])];
        assert_eq!(
            match_color_option("green bottle", &colors).map(|c| c.color_name.as_str()),
            Some("Green")
        );
        assert!(match_color_option("plain bottle", &colors).is_none());
    }

    #[test]
    fn reference_falls_back_when_match_has_no_images() {
        let colors = vec![color("Black", &[]), color("White", &["white-1", "white-2"])];
        let primary = ReferenceImage {
            data: "primary".into(),
            mime_type: "image/jpeg".into(),
        };

        let chosen = select_reference_image("black tee", &colors, Some(&primary)).unwrap();
        assert_eq!(chosen.data, "primary");

        let chosen = select_reference_image("white tee", &colors, Some(&primary)).unwrap();
        assert_eq!(chosen.data, "white-1");

        assert!(select_reference_image("grey tee", &colors, None).is_none());
    }

    #[test]
    fn resolve_prompt_matches_on_substituted_text() {
        let colors = vec![color("Olive", &["olive-img"])];
        let resolved = resolve_prompt("{{COLOR_1}} backpack on a trail", &colors, None);
        assert_eq!(resolved.text, "Olive backpack on a trail");
        assert_eq!(resolved.reference_image.unwrap().data, "olive-img");
    }

    #[test]
    fn collage_prompt_mentions_product_and_direction() {
        let prompt = build_collage_prompt("collage-1-3", "Wireless Mouse", Some("studio lighting"));
        assert!(!prompt.is_empty());
        assert!(prompt.contains("Wireless Mouse"));
        assert!(prompt.contains("4 panels"));
        assert!(prompt.contains("studio lighting"));
        assert!(!prompt.contains("{{COLOR_"));
    }

    #[test]
    fn collage_prompt_drops_unresolved_placeholders() {
        let prompt = build_collage_prompt("collage-2-2", "", Some("{{COLOR_4}} variant"));
        assert!(prompt.contains("the product"));
        assert!(!prompt.contains("{{COLOR_"));
        assert!(prompt.contains("variant"));
    }

    #[test]
    fn panel_count_handles_odd_codes() {
        assert_eq!(collage_panel_count("collage-1-2"), 3);
        assert_eq!(collage_panel_count("collage-3"), 3);
        assert_eq!(collage_panel_count("collage-grid"), 4);
        assert_eq!(collage_panel_count("collage-"), 4);
    }

    #[test]
    fn panel_count_saturates_on_huge_segments() {
        assert_eq!(collage_panel_count("collage-18446744073709551615-1"), 12);
        assert_eq!(
            collage_panel_count("collage-18446744073709551615-18446744073709551615"),
            12
        );
        assert_eq!(collage_panel_count("collage-5-5-5"), 12);
    }

    #[test]
    fn collage_subject_never_carries_placeholders() {
        let prompt = build_collage_prompt("collage-1-2", "{{COLOR_1}} ergonomic mouse", Some("studio"));
        assert!(!prompt.contains("{{COLOR_"));
        assert!(prompt.contains("ergonomic mouse"));

        let prompt = build_collage_prompt("collage-1-2", "{{COLOR_2}}", None);
        assert!(prompt.contains("the same product: the product."));
    }
}
