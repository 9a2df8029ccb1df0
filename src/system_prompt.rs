//! System prompt construction for tutoring sessions
//!
//! The prompt names the application the user is working in, describes the
//! active tutorial and step, and for proactive checks explains when to stay
//! silent.

use crate::state_machine::CycleKind;
use crate::tutorial::TutorialState;
use std::fmt::Write;

/// Reply that means "nothing worth saying" on a proactive check
pub const SILENCE_MARKER: &str = "[no comment]";

/// User-turn instruction sent with the latest frame on a proactive check
pub const PROACTIVE_CHECK_PROMPT: &str = "[The user has been quiet for a while. Here is their current screen.]";

const BASE_PROMPT: &str = r"You are a friendly, patient voice tutor helping someone learn {app}. You can see their screen when they share it and you hear them through their microphone.

Everything you write is spoken aloud, so:
- Keep replies short, usually one to three sentences.
- Never use markdown, lists, code blocks or emoji.
- Name menus, panels and buttons exactly as they appear in {app}.

Use create_tutorial when the user wants to learn a multi-step task, advance_step when they finish a step or want to move around the tutorial, and show_hotkey whenever you mention a keyboard shortcut.";

const PROACTIVE_SUFFIX: &str = r"

This turn was not started by the user. Look at their screen and decide whether a short tip would genuinely help, for example when they seem stuck, made a mistake, or completed the current step. If nothing is worth saying, reply with exactly [no comment] and nothing else.";

/// Human-readable application name for a tool type slug
fn app_name(tool_type: &str) -> &str {
    match tool_type {
        "photoshop" => "Adobe Photoshop",
        "illustrator" => "Adobe Illustrator",
        "premiere" => "Adobe Premiere Pro",
        "blender" => "Blender",
        "figma" => "Figma",
        "excel" => "Microsoft Excel",
        "davinci" | "davinci_resolve" => "DaVinci Resolve",
        other => other,
    }
}

/// Build the system prompt for one generation cycle
pub fn build_system_prompt(tool_type: &str, tutorial: &TutorialState, kind: CycleKind) -> String {
    let mut prompt = BASE_PROMPT.replace("{app}", app_name(tool_type));

    if let Some(topic) = tutorial.generating() {
        let _ = write!(
            prompt,
            "\n\nA tutorial about \"{topic}\" is being prepared and will appear on the user's screen shortly."
        );
    }

    if let Some(active) = tutorial.tutorial() {
        let _ = write!(prompt, "\n\n<tutorial title=\"{}\">", active.title);
        for (i, step) in active.steps.iter().enumerate() {
            let _ = write!(prompt, "\n{}. {}: {}", i + 1, step.title, step.instruction);
        }
        prompt.push_str("\n</tutorial>");
        if let Some((index, step)) = tutorial.current() {
            let _ = write!(
                prompt,
                "\nThe user is on step {} of {}: {}.",
                index + 1,
                active.steps.len(),
                step.title
            );
        }
    }

    if kind == CycleKind::Proactive {
        prompt.push_str(PROACTIVE_SUFFIX);
    }
    prompt
}

/// Whether a proactive reply asks to stay silent
pub fn is_silence(text: &str) -> bool {
    let text = text.trim();
    text.is_empty() || text.contains(SILENCE_MARKER)
}
