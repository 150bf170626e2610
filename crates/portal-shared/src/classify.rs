//! Filename and MIME heuristics used when ingesting lesson files in bulk.

/// Subject and category inferred from a lesson file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LessonKind {
    pub subject: &'static str,
    pub category: &'static str,
}

/// Resource type and category inferred from a resource file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceKind {
    pub resource_type: &'static str,
    pub category: &'static str,
}

pub fn lesson_kind(file_name: &str) -> LessonKind {
    let name = file_name.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| name.contains(n));

    // "non-verbal" contains "verbal", so it must be tested first.
    let subject = if has(&["math", "arithmetic", "number"]) {
        "maths"
    } else if has(&["english", "comprehension", "writing", "grammar"]) {
        "english"
    } else if has(&["non-verbal", "nonverbal", "spatial"]) {
        "non-verbal-reasoning"
    } else if has(&["verbal", "reasoning"]) {
        "verbal-reasoning"
    } else {
        "general"
    };

    let category = if has(&["worksheet", "practice"]) {
        "worksheet"
    } else if has(&["homework", "hw"]) {
        "homework"
    } else if has(&["test", "exam", "assessment"]) {
        "assessment"
    } else if has(&["answer", "solution", "marking"]) {
        "answers"
    } else {
        "lesson"
    };

    LessonKind { subject, category }
}

pub fn resource_kind(file_name: &str, mime: &str) -> ResourceKind {
    let name = file_name.to_lowercase();
    let (resource_type, category) = if name.contains("video") || mime.starts_with("video/") {
        ("video", "media")
    } else if name.contains("past") && name.contains("paper") {
        ("past-paper", "assessment")
    } else if name.contains("reading") || name.contains("book") {
        ("reading", "literature")
    } else if name.contains("guide") || name.contains("help") {
        ("guide", "reference")
    } else if mime.starts_with("image/") {
        ("image", "visual")
    } else if mime.contains("pdf") {
        ("document", "reference")
    } else if mime.contains("audio") {
        ("audio", "media")
    } else {
        ("general", "resource")
    };
    ResourceKind {
        resource_type,
        category,
    }
}

pub fn usage_instructions(resource_type: &str) -> &'static str {
    match resource_type {
        "video" => "Watch this educational video to enhance understanding of the topic.",
        "past-paper" => {
            "Use this past paper for exam practice. Time yourself and check answers afterwards."
        }
        "reading" => "Recommended reading to broaden knowledge and improve comprehension skills.",
        "guide" => "Reference guide with helpful tips and explanations for complex topics.",
        "image" => "Visual aid to support learning and understanding of concepts.",
        "audio" => "Listen to this audio content to reinforce learning through auditory means.",
        _ => "Additional resource to support and enhance learning.",
    }
}

/// Expected time on task for a lesson category.
pub fn estimated_duration(category: &str) -> &'static str {
    match category {
        "worksheet" => "30-45 minutes",
        "homework" => "20-30 minutes",
        _ => "varies",
    }
}

/// Render a byte count the way the portal UI shows it, e.g. `1.5 MB`.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = (value * 100.0).round() / 100.0;
    format!("{} {}", rounded, UNITS[unit])
}

/// Title derived from a file name: extension dropped, `_` and `-` become spaces.
pub fn clean_title(file_name: &str) -> String {
    let stem = match file_name.rfind('.') {
        Some(idx) if idx > 0 => &file_name[..idx],
        _ => file_name,
    };
    stem.replace(['_', '-'], " ")
}

/// Lower-cased extension of a file name, or an empty string.
pub fn extension(file_name: &str) -> String {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default()
}

/// Split a `;`-separated spreadsheet cell into trimmed, non-empty items.
pub fn split_list(cell: &str) -> Vec<String> {
    cell.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
