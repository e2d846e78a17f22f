//! Prompt text for each gateway operation.
//!
//! Every prompt demands bare JSON; `parse` cleans up when the model
//! ignores that.

use std::fmt::Write;

use fabula_core::gateway::{EvaluationContext, InstallmentContext};

pub const PREMISE_SYSTEM: &str = "You invent premises for short serialized absurdist fiction. \
Answer with a single JSON object and nothing else.";

pub fn premise_prompt() -> String {
    "Invent a premise for a new serialized story. Constraints:\n\
     - The protagonist is always an engineer named Tom. You may pick a variant \
     (e.g. \"Tom the Night-Shift Validator\") but his name stays Tom.\n\
     - Choose one to three real authors whose prose styles will be blended.\n\
     - The premise should be two or three sentences and leave room to escalate.\n\
     Respond with JSON only, using exactly these keys:\n\
     {\"title\": string, \"premise\": string, \"themes\": [string], \
     \"style_authors\": [string], \"perspective\": string, \"tone\": string, \
     \"genre_tags\": [string], \"tom_variant\": string}"
        .to_string()
}

pub const INSTALLMENT_SYSTEM: &str = "You write one installment of an ongoing serialized story. \
Answer with a single JSON object and nothing else.";

pub fn installment_prompt(ctx: &InstallmentContext<'_>) -> String {
    let narrative = ctx.narrative;
    let mut prompt = String::new();
    let _ = writeln!(prompt, "Title: {}", narrative.title);
    let _ = writeln!(prompt, "Premise: {}", narrative.premise);
    if !narrative.style.style_authors.is_empty() {
        let _ = writeln!(
            prompt,
            "Write in a blend of these authors' styles: {}.",
            narrative.style.style_authors.join(", ")
        );
    }
    if !narrative.style.tone.is_empty() {
        let _ = writeln!(prompt, "Tone: {}.", narrative.style.tone);
    }
    if !narrative.style.perspective.is_empty() {
        let _ = writeln!(prompt, "Perspective: {}.", narrative.style.perspective);
    }
    if ctx.recent.is_empty() {
        let _ = writeln!(prompt, "\nWrite installment 1, the opening.");
    } else {
        let _ = writeln!(prompt, "\nThe most recent installments:");
        for installment in ctx.recent {
            let _ = writeln!(prompt, "--- Installment {} ---", installment.order);
            let _ = writeln!(prompt, "{}", installment.body);
        }
        let _ = writeln!(
            prompt,
            "\nWrite installment {}, continuing directly from the above.",
            ctx.order
        );
    }
    let _ = writeln!(
        prompt,
        "Target this escalation profile, where 0 is mundane and values \
         above 1 are past all restraint: absurdity {:.2}, surrealism {:.2}, \
         ridiculousness {:.2}, insanity {:.2}.",
        ctx.chaos.absurdity, ctx.chaos.surrealism, ctx.chaos.ridiculousness, ctx.chaos.insanity
    );
    let _ = write!(
        prompt,
        "Aim for 600 to 900 words. Respond with JSON only: {{\"body\": string, \
         \"intensity\": {{string: number between 0 and 1}}}}. Name two to four \
         intensity dimensions yourself."
    );
    prompt
}

pub const EVALUATION_SYSTEM: &str = "You are a strict fiction editor. \
Answer with a single JSON object and nothing else.";

pub fn evaluation_prompt(ctx: &EvaluationContext<'_>) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "Title: {}", ctx.narrative.title);
    let _ = writeln!(prompt, "Premise: {}", ctx.narrative.premise);
    let _ = writeln!(prompt, "\nRecent installments:");
    for installment in ctx.recent {
        let _ = writeln!(prompt, "--- Installment {} ---", installment.order);
        let _ = writeln!(prompt, "{}", installment.body);
    }
    let _ = write!(
        prompt,
        "\nScore the story so far on a 0-10 scale per dimension. A story \
         whose composite lands below {:.2} will be ended, so be honest. \
         Respond with JSON only: {{\"coherence\": number, \"novelty\": number, \
         \"engagement\": number, \"pacing\": number, \"should_continue\": \
         boolean, \"reasoning\": string, \"issues\": [string]}}.",
        ctx.quality_floor
    );
    prompt
}

pub fn cover_prompt(title: &str, premise: &str) -> String {
    format!(
        "Book cover illustration for an absurdist serialized story titled \
         \"{title}\". {premise} Flat colors, bold shapes, the title set in \
         bold typography. Keep the imagery family-friendly."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fabula_core::chaos::{ChaosRange, ChaosRanges, ChaosVector};
    use fabula_core::gateway::GenerationSettings;
    use fabula_core::model::{
        Installment, InstallmentId, Narrative, NarrativeId, NarrativeStatus, StyleProfile,
    };
    use std::collections::BTreeMap;

    fn narrative() -> Narrative {
        Narrative {
            id: NarrativeId::new(),
            title: "The Ferry Audit".to_string(),
            premise: "Tom audits a ferry that only docks in dreams.".to_string(),
            premise_themes: vec!["bureaucracy".to_string()],
            style: StyleProfile {
                style_authors: vec!["Author One".to_string(), "Author Two".to_string()],
                perspective: "third".to_string(),
                tone: "deadpan".to_string(),
                genre_tags: vec!["absurdist".to_string()],
                tom_variant: "Tom the Auditor".to_string(),
            },
            status: NarrativeStatus::Active,
            chaos_initial: ChaosVector::new(0.1, 0.1, 0.1, 0.1),
            chaos_ranges: ChaosRanges::uniform(ChaosRange::new(0.02, 0.08)),
            installment_count: 1,
            total_tokens: 0,
            cover_image_url: None,
            created_at: Utc::now(),
            last_installment_at: None,
            completed_at: None,
            completion_reason: None,
        }
    }

    fn installment(order: u32, body: &str) -> Installment {
        Installment {
            id: InstallmentId::new(),
            narrative_id: NarrativeId::new(),
            order,
            body: body.to_string(),
            chaos: ChaosVector::default(),
            intensity: BTreeMap::new(),
            tokens_used: None,
            latency_ms: None,
            model: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_premise_prompt_pins_tom_and_json_shape() {
        let prompt = premise_prompt();
        assert!(prompt.contains("engineer named Tom"));
        assert!(prompt.contains("one to three"));
        assert!(prompt.contains("\"style_authors\""));
        assert!(prompt.contains("JSON only"));
    }

    #[test]
    fn test_installment_prompt_carries_context_and_chaos() {
        let narrative = narrative();
        let recent = vec![installment(1, "Tom boarded the ferry at low tide.")];
        let settings = GenerationSettings::default();
        let ctx = InstallmentContext {
            narrative: &narrative,
            recent: &recent,
            order: 2,
            chaos: ChaosVector::new(0.15, 0.2, 0.25, 0.3),
            settings: &settings,
        };
        let prompt = installment_prompt(&ctx);
        assert!(prompt.contains("The Ferry Audit"));
        assert!(prompt.contains("Author One, Author Two"));
        assert!(prompt.contains("Tom boarded the ferry at low tide."));
        assert!(prompt.contains("Write installment 2"));
        assert!(prompt.contains("absurdity 0.15"));
        assert!(prompt.contains("insanity 0.30"));
    }

    #[test]
    fn test_opening_installment_prompt_has_no_context_block() {
        let narrative = narrative();
        let settings = GenerationSettings::default();
        let ctx = InstallmentContext {
            narrative: &narrative,
            recent: &[],
            order: 1,
            chaos: ChaosVector::new(0.1, 0.1, 0.1, 0.1),
            settings: &settings,
        };
        let prompt = installment_prompt(&ctx);
        assert!(prompt.contains("Write installment 1, the opening."));
        assert!(!prompt.contains("most recent installments"));
    }

    #[test]
    fn test_evaluation_prompt_states_the_floor() {
        let narrative = narrative();
        let recent = vec![installment(1, "Tom filed the manifest.")];
        let settings = GenerationSettings::default();
        let ctx = EvaluationContext {
            narrative: &narrative,
            recent: &recent,
            quality_floor: 0.6,
            settings: &settings,
        };
        let prompt = evaluation_prompt(&ctx);
        assert!(prompt.contains("below 0.60"));
        assert!(prompt.contains("\"should_continue\""));
        assert!(prompt.contains("Tom filed the manifest."));
    }

    #[test]
    fn test_cover_prompt_includes_title_and_premise() {
        let prompt = cover_prompt("The Ferry Audit", "Tom audits a ferry.");
        assert!(prompt.contains("\"The Ferry Audit\""));
        assert!(prompt.contains("Tom audits a ferry."));
    }
}
