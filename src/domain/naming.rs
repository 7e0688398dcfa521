//! Naming rules for uploaded files and datasets.

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

use super::{FileType, ParserType};

static PDF_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^.*\.pdf$").expect("static regex"));

static DOC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^.*\.(eml|doc|docx|ppt|pptx|yml|xml|htm|json|csv|txt|ini|xls|xlsx|wps|rtf|hlp|pages|numbers|key|md|py|js|java|c|cpp|h|php|go|ts|sh|cs|kt|html|sql)$",
    )
    .expect("static regex")
});

static AURAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^.*\.(wav|flac|ape|alac|wavpack|wv|mp3|aac|ogg|vorbis|opus)$")
        .expect("static regex")
});

static VISUAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^.*\.(jpg|jpeg|png|tif|gif|pcx|tga|exif|fpx|svg|psd|cdr|pcd|dxf|ufo|eps|ai|raw|wmf|webp|avif|apng|icon|ico|mpg|mpeg|avi|rm|rmvb|mov|wmv|asf|dat|asx|wvx|mpe|mpa|mp4)$",
    )
    .expect("static regex")
});

static PRESENTATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.(ppt|pptx|pages)$").expect("static regex"));

static COUNTER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(([0-9]+)\)$").expect("static regex"));

static CJK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\u{4e00}-\u{9fff}\u{3040}-\u{30ff}\u{ac00}-\u{d7af}]").expect("static regex"));

/// Returns `name`, or the first `stem(n).ext` variant that `taken` rejects.
///
/// An existing `(n)` counter is continued rather than nested, so
/// `file(1).jpg` becomes `file(2).jpg`.
pub fn duplicate_name(name: &str, taken: impl Fn(&str) -> bool) -> String {
    let mut candidate = name.to_string();
    while taken(&candidate) {
        candidate = bump_counter(&candidate);
    }
    candidate
}

fn bump_counter(name: &str) -> String {
    let ext = extension(name);
    let stem = &name[..name.len() - ext.len()];

    // A counter that cannot be continued is kept and a fresh one nested.
    let continued = COUNTER_RE.captures(stem).and_then(|caps| {
        let next = caps[1].parse::<u64>().ok()?.checked_add(1)?;
        let start = caps.get(0).map_or(stem.len(), |m| m.start());
        Some((&stem[..start], next))
    });
    let (base, next) = continued.unwrap_or((stem, 1));

    format!("{base}({next}){ext}")
}

/// The `.ext` suffix including the dot, or "" when there is none.
pub fn extension(name: &str) -> &str {
    match Path::new(name).extension().and_then(|e| e.to_str()) {
        Some(ext) if name.len() > ext.len() + 1 => &name[name.len() - ext.len() - 1..],
        _ => "",
    }
}

pub fn filename_type(filename: &str) -> FileType {
    let name = filename.to_lowercase();
    if PDF_RE.is_match(&name) {
        FileType::Pdf
    } else if DOC_RE.is_match(&name) {
        FileType::Doc
    } else if AURAL_RE.is_match(&name) {
        FileType::Aural
    } else if VISUAL_RE.is_match(&name) {
        FileType::Visual
    } else {
        FileType::Other
    }
}

pub fn is_presentation(filename: &str) -> bool {
    PRESENTATION_RE.is_match(&filename.to_lowercase())
}

/// Picks the chunking method a file type forces, falling back to `default`.
pub fn parser_for(file_type: FileType, filename: &str, default: &str) -> String {
    let lower = filename.to_lowercase();
    match file_type {
        FileType::Visual => ParserType::Picture.as_str().to_string(),
        FileType::Aural => ParserType::Audio.as_str().to_string(),
        _ if is_presentation(&lower) => ParserType::Presentation.as_str().to_string(),
        _ if lower.ends_with(".eml") => ParserType::Email.as_str().to_string(),
        _ => default.to_string(),
    }
}

pub fn is_valid_url(url: &str) -> bool {
    let Some((scheme, rest)) = url.split_once("://") else {
        return false;
    };
    if !matches!(scheme.to_lowercase().as_str(), "http" | "https") {
        return false;
    }
    let host = rest
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .rsplit('@')
        .next()
        .unwrap_or_default();
    let host = host.split(':').next().unwrap_or_default();
    !host.is_empty() && !host.contains(char::is_whitespace)
}

/// Rough token count: whitespace-separated words plus one per CJK character.
pub fn num_tokens(text: &str) -> usize {
    let cjk = CJK_RE.find_iter(text).count();
    let words = text
        .split_whitespace()
        .filter(|w| !CJK_RE.replace_all(w, "").is_empty())
        .count();
    words + cjk
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn taken<'a>(names: &'a [&'a str]) -> impl Fn(&str) -> bool + 'a {
        let set: HashSet<&str> = names.iter().copied().collect();
        move |n| set.contains(n)
    }

    #[test]
    fn test_duplicate_name_free() {
        assert_eq!(duplicate_name("file.jpg", taken(&[])), "file.jpg");
    }

    #[test]
    fn test_duplicate_name_appends_counter() {
        assert_eq!(duplicate_name("file.jpg", taken(&["file.jpg"])), "file(1).jpg");
        assert_eq!(
            duplicate_name("file.jpg", taken(&["file.jpg", "file(1).jpg"])),
            "file(2).jpg"
        );
    }

    #[test]
    fn test_duplicate_name_continues_existing_counter() {
        assert_eq!(duplicate_name("file(1).jpg", taken(&["file(1).jpg"])), "file(2).jpg");
    }

    #[test]
    fn test_duplicate_name_nests_exhausted_counter() {
        let max = format!("file({}).txt", u64::MAX);
        assert_eq!(
            duplicate_name(&max, taken(&[max.as_str()])),
            format!("file({})(1).txt", u64::MAX)
        );
        let huge = "file(99999999999999999999999).txt";
        assert_eq!(
            duplicate_name(huge, taken(&[huge])),
            "file(99999999999999999999999)(1).txt"
        );
    }

    #[test]
    fn test_duplicate_name_without_extension() {
        assert_eq!(duplicate_name("notes", taken(&["notes"])), "notes(1)");
    }

    #[test]
    fn test_extension() {
        assert_eq!(extension("a.tar.gz"), ".gz");
        assert_eq!(extension("README"), "");
        assert_eq!(extension(".bashrc"), "");
    }

    #[test]
    fn test_filename_type() {
        assert_eq!(filename_type("Report.PDF"), FileType::Pdf);
        assert_eq!(filename_type("notes.md"), FileType::Doc);
        assert_eq!(filename_type("song.mp3"), FileType::Aural);
        assert_eq!(filename_type("photo.jpeg"), FileType::Visual);
        assert_eq!(filename_type("archive.zip"), FileType::Other);
    }

    #[test]
    fn test_parser_for() {
        assert_eq!(parser_for(FileType::Visual, "a.png", "naive"), "picture");
        assert_eq!(parser_for(FileType::Aural, "a.wav", "naive"), "audio");
        assert_eq!(parser_for(FileType::Doc, "deck.PPTX", "naive"), "presentation");
        assert_eq!(parser_for(FileType::Doc, "mail.eml", "naive"), "email");
        assert_eq!(parser_for(FileType::Pdf, "paper.pdf", "book"), "book");
    }

    #[test]
    fn test_is_valid_url() {
        assert!(is_valid_url("https://example.com/page?q=1"));
        assert!(is_valid_url("http://localhost:8080"));
        assert!(!is_valid_url("ftp://example.com"));
        assert!(!is_valid_url("https://"));
        assert!(!is_valid_url("example.com"));
    }

    #[test]
    fn test_num_tokens() {
        assert_eq!(num_tokens("hello brave new world"), 4);
        assert_eq!(num_tokens("你好"), 2);
        assert_eq!(num_tokens(""), 0);
    }
}
