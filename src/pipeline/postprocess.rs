//! Post-processing: turn the vision model's free-form reply into detected
//! questions.
//!
//! Even when told "return ONLY valid JSON", models regularly wrap the answer
//! in ```` ```json ```` fences or add a sentence before it. Parsing runs in
//! three passes:
//!
//! 1. Strip every markdown fence marker and trim.
//! 2. Parse the remainder as the reply object.
//! 3. If that fails, parse the outermost `{…}` slice instead.
//!
//! A reply without a `questions` key is an empty list, not an error; the
//! detector decides what an empty list means. Entries are read one by one: an
//! entry whose box is missing or non-numeric becomes a malformed detection in
//! its slot, and the rest of the reply is kept.

use crate::error::DetectionFailure;
use crate::output::{BoundingBox, DetectedQuestion};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

static RE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```[A-Za-z]*[ \t]*\r?\n?").unwrap());

/// Remove markdown code-fence markers (with optional language tag).
pub fn strip_code_fences(input: &str) -> String {
    RE_FENCE.replace_all(input, "").trim().to_string()
}

#[derive(Debug, Deserialize)]
struct DetectionReply {
    #[serde(default)]
    questions: Vec<Value>,
}

// The model's own `questionNumber` is ignored: page-local numbers are the
// 1-based reply position.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplyQuestion {
    bounding_box: BoundingBox,
}

/// Parse a reply into page-local detections, numbered 1.. in reply order.
///
/// Fails only when the reply holds no JSON object with a `questions` array.
pub fn parse_detections(reply: &str) -> Result<Vec<DetectedQuestion>, DetectionFailure> {
    let cleaned = strip_code_fences(reply);

    let parsed: DetectionReply = match serde_json::from_str(&cleaned) {
        Ok(p) => p,
        Err(first_err) => match outermost_object(&cleaned) {
            Some(slice) => serde_json::from_str(slice)
                .map_err(|_| DetectionFailure::Parse(first_err.to_string()))?,
            None => return Err(DetectionFailure::Parse(first_err.to_string())),
        },
    };

    Ok(parsed
        .questions
        .into_iter()
        .enumerate()
        .map(|(i, entry)| {
            let number = i as u32 + 1;
            match serde_json::from_value::<ReplyQuestion>(entry) {
                Ok(q) => DetectedQuestion::new(number, q.bounding_box),
                Err(e) => DetectedQuestion::malformed(number, e.to_string()),
            }
        })
        .collect())
}

fn outermost_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let end = s.rfind('}')?;
    (end > start).then(|| &s[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAIN: &str = r#"{"questions":[
        {"questionNumber":1,"boundingBox":{"x":90,"y":120,"width":1850,"height":680}},
        {"questionNumber":2,"boundingBox":{"x":90.5,"y":820,"width":1850,"height":700.25}}
    ]}"#;

    #[test]
    fn parses_plain_json() {
        let qs = parse_detections(PLAIN).unwrap();
        assert_eq!(qs.len(), 2);
        assert_eq!(qs[0].question_number, 1);
        let b = qs[1].bounding_box.unwrap();
        assert_eq!(b.x, 90.5);
        assert_eq!(b.height, 700.25);
    }

    #[test]
    fn strips_json_fences() {
        let fenced = format!("```json\n{PLAIN}\n```");
        assert_eq!(parse_detections(&fenced).unwrap().len(), 2);
        let bare = format!("```\n{PLAIN}\n```\n");
        assert_eq!(parse_detections(&bare).unwrap().len(), 2);
    }

    #[test]
    fn tolerates_surrounding_prose() {
        let chatty = format!("Here are the questions I found:\n{PLAIN}\nLet me know!");
        assert_eq!(parse_detections(&chatty).unwrap().len(), 2);
    }

    #[test]
    fn missing_questions_key_is_empty() {
        assert!(parse_detections(r#"{"page": 1}"#).unwrap().is_empty());
    }

    #[test]
    fn garbage_is_a_parse_failure() {
        let err = parse_detections("I cannot help with that.").unwrap_err();
        assert!(matches!(err, DetectionFailure::Parse(_)));
    }

    #[test]
    fn malformed_entry_keeps_its_neighbours() {
        let reply = r#"{"questions":[
            {"questionNumber":1,"boundingBox":{"x":10,"y":10,"width":100,"height":50}},
            {"questionNumber":2,"boundingBox":{"x":10,"y":80,"width":100}},
            {"questionNumber":3,"boundingBox":{"x":10,"y":"low","width":100,"height":50}},
            {"questionNumber":4,"boundingBox":{"x":10,"y":150,"width":100,"height":50}}
        ]}"#;
        let qs = parse_detections(reply).unwrap();
        assert_eq!(qs.len(), 4);
        assert_eq!(qs[0].bounding_box, Some(BoundingBox::new(10.0, 10.0, 100.0, 50.0)));
        assert!(qs[1].is_malformed());
        assert!(qs[1].malformed.as_deref().unwrap().contains("height"));
        assert!(qs[2].is_malformed());
        assert_eq!(qs[3].bounding_box, Some(BoundingBox::new(10.0, 150.0, 100.0, 50.0)));
        let nums: Vec<u32> = qs.iter().map(|q| q.question_number).collect();
        assert_eq!(nums, vec![1, 2, 3, 4]);
    }

    #[test]
    fn non_array_questions_is_a_parse_failure() {
        let err = parse_detections(r#"{"questions": "none"}"#).unwrap_err();
        assert!(matches!(err, DetectionFailure::Parse(_)));
    }

    #[test]
    fn numbers_are_page_local_positions() {
        let reply = r#"{"questions":[
            {"boundingBox":{"x":0,"y":0,"width":10,"height":10}},
            {"questionNumber":-3,"boundingBox":{"x":0,"y":20,"width":10,"height":10}},
            {"questionNumber":7,"boundingBox":{"x":0,"y":40,"width":10,"height":10}}
        ]}"#;
        let nums: Vec<u32> = parse_detections(reply)
            .unwrap()
            .iter()
            .map(|q| q.question_number)
            .collect();
        assert_eq!(nums, vec![1, 2, 3]);
    }

    #[test]
    fn strip_code_fences_leaves_plain_text() {
        assert_eq!(strip_code_fences("  {\"a\":1}  "), "{\"a\":1}");
    }
}
