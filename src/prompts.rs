//! Instruction text for vision-based question boundary detection.
//!
//! The prompt is the whole contract with the model: what counts as one
//! question block and the exact JSON shape expected back. Keeping it here,
//! away from the retry and parsing code, lets prompt tests inspect it
//! directly. Callers can override it via
//! [`crate::config::ExtractionConfig::detection_prompt`].

/// Default instruction sent alongside every page image.
pub const DEFAULT_DETECTION_PROMPT: &str = r#"You are analyzing one page of an exam question paper.

CRITICAL RULES:
1. A question block is the question text + any diagrams, graphs or tables + ALL of its answer options (A, B, C, D)
2. Each bounding box must enclose the ENTIRE question block as one region
3. Detect ALL questions visible on this page, in reading order
4. Coordinates are integer pixels of this image: x, y is the top-left corner
5. Return ONLY valid JSON, no markdown, no explanation

Return this exact JSON format:
{
  "questions": [
    {
      "questionNumber": 1,
      "boundingBox": {
        "x": 90,
        "y": 120,
        "width": 1850,
        "height": 680
      }
    }
  ]
}

If the page contains no questions, return {"questions": []}."#;

/// Append the rendered page size so the model answers in the right pixel space.
pub fn detection_prompt(base: &str, width: u32, height: u32) -> String {
    format!("{base}\n\nThe image is {width} pixels wide and {height} pixels tall.")
}
