//! Prompt templates for both passes.

use std::fmt::Write as _;

use critique_core::{Advisor, Dimension, DimensionalProfile};

/// Rubric description shown to the model in pass 1.
const RUBRIC: &[(Dimension, &str)] = &[
    (
        Dimension::Composition,
        "arrangement of elements, lines, framing",
    ),
    (
        Dimension::Lighting,
        "quality, direction and tonal range of light",
    ),
    (Dimension::Focus, "sharpness where it matters, depth of field"),
    (Dimension::Color, "color harmony or tonal control in monochrome"),
    (Dimension::Isolation, "separation of the subject from its surroundings"),
    (Dimension::Depth, "sense of depth and perspective"),
    (Dimension::Balance, "visual weight across the frame"),
    (Dimension::Emotion, "emotional impact and storytelling"),
];

fn dimension_keys() -> String {
    Dimension::ALL
        .iter()
        .map(|d| format!("\"{}\"", d.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Pass 1 prompt: score the image on the rubric, in the advisor's voice.
pub fn extraction_prompt(advisor: &Advisor) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Study the attached photograph as {} would and score it on each dimension from 0 to 10:",
        advisor.name
    );
    for (dim, description) in RUBRIC {
        let _ = writeln!(out, "- {} ({}): {}", dim.label(), dim.as_str(), description);
    }
    if !advisor.focus_areas.is_empty() {
        let _ = writeln!(
            out,
            "Pay particular attention to: {}.",
            advisor.focus_areas.join(", ")
        );
    }
    let _ = write!(
        out,
        "\nRespond with a single JSON object and nothing else:\n\
         {{\n  \"scores\": {{ one number per key: {keys} }},\n  \
         \"comments\": {{ one sentence per key }},\n  \
         \"technique_tags\": [snake_case technique identifiers you observe],\n  \
         \"title\": optional short title,\n  \
         \"overall_grade\": optional letter grade\n}}\n\
         Use null for a dimension you cannot assess.",
        keys = dimension_keys()
    );
    out
}

/// Pass 2 prompt: produce the structured critique.
///
/// `comparative` asks for the per-dimension comparison fields that only make
/// sense when reference context is present in the system prompt.
pub fn critique_prompt(query: &DimensionalProfile, comparative: bool) -> String {
    let mut out = String::new();
    out.push_str("Write your critique of the attached photograph. Its rubric scores were:\n");
    for (dim, score) in query.scores.iter() {
        match score {
            Some(v) => {
                let _ = writeln!(out, "- {}: {:.1}", dim.label(), v);
            }
            None => {
                let _ = writeln!(out, "- {}: not assessed", dim.label());
            }
        }
    }

    let comparison_fields = if comparative {
        ", \"user_technique\": ..., \"reference_technique\": ..., \
         \"execution_gap\": ..., \"recommendation\": ..."
    } else {
        ", \"recommendation\": ..."
    };
    let _ = write!(
        out,
        "\nRespond with a single JSON object and nothing else:\n\
         {{\n  \"summary\": overall critique in your voice,\n  \
         \"overall_grade\": letter grade,\n  \
         \"dimensions\": [ {{ \"dimension\": one of {keys}, \"score\": number, \
         \"comment\": ...{fields} }} ]\n}}\n\
         Include every dimension exactly once.",
        keys = dimension_keys(),
        fields = comparison_fields
    );
    out
}
