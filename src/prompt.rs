use crate::script::{IMAGE_PROMPTS_PER_SCENE, MIN_SCENES};

/// Step-one prompt: a long-form narrative on the topic, plain text only.
pub fn build_narrative_prompt(title: &str) -> String {
    format!(
        r#"You are an expert educational storyteller and psychology researcher.
Your task is to write a deep, engaging, and clear educational script on the topic: "{title}".

GUIDELINES:
1. Structure: start with a strong hook, then explain the concept clearly, provide examples and insights, and end with a resolution or takeaway.
2. Tone: calm, human, professional, curious, and intelligent. NOT motivational hype.
3. Length: comprehensive enough to cover the topic well (approx. 30-40 phrases or ideas).
4. Format: just write the raw script text. Paragraphs are fine.

GOAL:
Teach the viewer about "{title}" in a way that feels like high-quality documentary narration.
"#
    )
}

/// Step-two prompt: convert the narrative into the strict scene JSON shape
/// the retry loop validates against.
pub fn build_scene_prompt(narrative: &str) -> String {
    format!(
        r#"You are an expert AI screenwriter and director.
I will provide you with an educational script. Convert it into a structured JSON document for video generation.

INPUT SCRIPT:
"{narrative}"

INSTRUCTIONS:
1. Break the script into small, spoken-style scenes (1-3 sentences each). Each scene is one logical beat of the story. Use at least {MIN_SCENES} scenes.
2. For EACH scene, generate EXACTLY {IMAGE_PROMPTS_PER_SCENE} DISTINCT image prompts describing completely different visuals for the SAME idea (one literal, one metaphorical, one abstract).

STRICT JSON OUTPUT FORMAT:
{{
  "title": "Derived Title",
  "description": "Short description",
  "scenes": [
    {{
      "id": 1,
      "text": "First chunk of narration...",
      "image_prompts": [
        "cartoonish image of ...",
        "cartoonish image of ...",
        "cartoonish image of ..."
      ],
      "audio_delay": 0.5,
      "emotion": "calm"
    }}
  ]
}}

IMAGE PROMPT RULES:
- Always start each prompt with "cartoonish image of".
- Simple objects, clear composition, minimal detail. No text in images, no faces.

SCENE RULES:
- Text: keep it spoken and natural.
- Ids are sequential integers: 1, 2, 3...
- emotion is one of: happy, sad, angry, surprised, excited, calm.
- audio_delay is the pause after the scene, in seconds (0.5 to 2.0).

OUTPUT ONLY THE VALID JSON OBJECT. NO MARKDOWN. NO EXTRA TEXT.
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrative_prompt_carries_the_title() {
        let prompt = build_narrative_prompt("Why We Procrastinate");
        assert!(prompt.contains("\"Why We Procrastinate\""));
    }

    #[test]
    fn scene_prompt_embeds_narrative_and_rules() {
        let prompt = build_scene_prompt("the narrative body");
        assert!(prompt.contains("the narrative body"));
        assert!(prompt.contains("EXACTLY 3 DISTINCT image prompts"));
        assert!(prompt.contains("\"image_prompts\""));
    }
}
