//! Kana romanization for the transliteration pipeline.
//!
//! Pure-table Hepburn romanization of hiragana and katakana. Kanji and any
//! other script pass through untouched; turning kanji into readings needs a
//! dictionary and is a provider concern, not this engine's.

use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::LangkitError;
use crate::progress::importance::BAR_TRANSLIT_PROCESS;
use crate::subtitle::{sibling_subtitle, tagged_output_path, Subtitle};
use crate::task::{TaskContext, TranslitOptions};
use crate::Result;

/// Which spans get romanized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranslitStyle {
    /// Romanize all kana.
    Hepburn,
    /// Romanize katakana only (loanwords), keep hiragana.
    Selective,
}

/// Romanize the subtitle next to `media`, writing `<base>.ROMAJI.srt`.
pub fn romanize_sibling_subtitle(
    ctx: &TaskContext,
    media: &Path,
    opts: &TranslitOptions,
) -> Result<PathBuf> {
    ctx.check_cancelled()?;
    let source = sibling_subtitle(media).ok_or_else(|| {
        LangkitError::validation(format!(
            "no subtitle found next to {} to romanize",
            media.display()
        ))
    })?;
    let subtitle = Subtitle::load(&source)?;
    let total = subtitle.entries.len().max(1);

    let mut out = Subtitle::default();
    for (i, entry) in subtitle.entries.iter().enumerate() {
        ctx.check_cancelled()?;
        let mut romanized = entry.clone();
        romanized.text = romanize_text(&entry.text, opts.style);
        out.entries.push(romanized);
        ctx.reporter.update(
            BAR_TRANSLIT_PROCESS,
            ((i + 1) * 100 / total) as u32,
            100,
            "romanize",
            "Romanizing subtitles",
        );
    }

    let out_path = tagged_output_path(media, "ROMAJI");
    out.save(&out_path)?;
    info!("wrote {}", out_path.display());
    Ok(out_path)
}

/// Romanize one text span according to the style.
pub fn romanize_text(text: &str, style: TranslitStyle) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    let mut pending_sokuon = false;

    while i < chars.len() {
        let c = chars[i];
        let (normalized, is_katakana) = normalize_kana(c);

        let eligible = match style {
            TranslitStyle::Hepburn => normalized.is_some(),
            TranslitStyle::Selective => normalized.is_some() && is_katakana,
        };

        let Some(kana) = normalized.filter(|_| eligible) else {
            pending_sokuon = false;
            out.push(c);
            i += 1;
            continue;
        };

        // Sokuon doubles the next consonant.
        if kana == 'っ' {
            pending_sokuon = true;
            i += 1;
            continue;
        }

        // Long-vowel mark repeats the previous vowel.
        if kana == 'ー' {
            if let Some(prev) = out.chars().rev().find(|ch| ch.is_ascii_alphabetic()) {
                if "aeiou".contains(prev) {
                    out.push(prev);
                }
            }
            i += 1;
            continue;
        }

        // Digraph with a small ya/yu/yo?
        let mut romaji: Option<&str> = None;
        if i + 1 < chars.len() {
            if let (Some(next), _) = normalize_kana(chars[i + 1]) {
                if matches!(next, 'ゃ' | 'ゅ' | 'ょ') {
                    romaji = digraph_romaji(kana, next);
                    if romaji.is_some() {
                        i += 1;
                    }
                }
            }
        }
        let romaji = romaji.or_else(|| base_romaji(kana));

        match romaji {
            Some(r) => {
                if pending_sokuon {
                    if let Some(first) = r.chars().next().filter(|c| c.is_ascii_alphabetic()) {
                        // Hepburn: っち -> tchi
                        out.push(if r.starts_with("ch") { 't' } else { first });
                    }
                }
                out.push_str(r);
            }
            None => out.push(c),
        }
        pending_sokuon = false;
        i += 1;
    }
    out
}

/// Map a character to its hiragana equivalent, remembering whether it was
/// katakana. Returns `None` for non-kana.
fn normalize_kana(c: char) -> (Option<char>, bool) {
    match c {
        'ぁ'..='ゖ' | 'ー' => (Some(c), false),
        'ァ'..='ヶ' => {
            let shifted = char::from_u32(c as u32 - 0x60);
            (shifted, true)
        }
        _ => (None, false),
    }
}

fn digraph_romaji(base: char, small: char) -> Option<&'static str> {
    let row = match base {
        'き' => "k",
        'ぎ' => "g",
        'し' => "sh",
        'じ' => "j",
        'ち' => "ch",
        'に' => "n",
        'ひ' => "h",
        'び' => "b",
        'ぴ' => "p",
        'み' => "m",
        'り' => "r",
        _ => return None,
    };
    let vowel = match small {
        'ゃ' => "a",
        'ゅ' => "u",
        'ょ' => "o",
        _ => return None,
    };
    // sh/j/ch rows drop the y.
    let keep_y = !matches!(base, 'し' | 'じ' | 'ち');
    let result: &'static str = match (row, keep_y, vowel) {
        ("k", true, "a") => "kya",
        ("k", true, "u") => "kyu",
        ("k", true, "o") => "kyo",
        ("g", true, "a") => "gya",
        ("g", true, "u") => "gyu",
        ("g", true, "o") => "gyo",
        ("sh", false, "a") => "sha",
        ("sh", false, "u") => "shu",
        ("sh", false, "o") => "sho",
        ("j", false, "a") => "ja",
        ("j", false, "u") => "ju",
        ("j", false, "o") => "jo",
        ("ch", false, "a") => "cha",
        ("ch", false, "u") => "chu",
        ("ch", false, "o") => "cho",
        ("n", true, "a") => "nya",
        ("n", true, "u") => "nyu",
        ("n", true, "o") => "nyo",
        ("h", true, "a") => "hya",
        ("h", true, "u") => "hyu",
        ("h", true, "o") => "hyo",
        ("b", true, "a") => "bya",
        ("b", true, "u") => "byu",
        ("b", true, "o") => "byo",
        ("p", true, "a") => "pya",
        ("p", true, "u") => "pyu",
        ("p", true, "o") => "pyo",
        ("m", true, "a") => "mya",
        ("m", true, "u") => "myu",
        ("m", true, "o") => "myo",
        ("r", true, "a") => "rya",
        ("r", true, "u") => "ryu",
        ("r", true, "o") => "ryo",
        _ => return None,
    };
    Some(result)
}

fn base_romaji(kana: char) -> Option<&'static str> {
    Some(match kana {
        'あ' => "a",
        'い' => "i",
        'う' => "u",
        'え' => "e",
        'お' => "o",
        'か' => "ka",
        'き' => "ki",
        'く' => "ku",
        'け' => "ke",
        'こ' => "ko",
        'が' => "ga",
        'ぎ' => "gi",
        'ぐ' => "gu",
        'げ' => "ge",
        'ご' => "go",
        'さ' => "sa",
        'し' => "shi",
        'す' => "su",
        'せ' => "se",
        'そ' => "so",
        'ざ' => "za",
        'じ' => "ji",
        'ず' => "zu",
        'ぜ' => "ze",
        'ぞ' => "zo",
        'た' => "ta",
        'ち' => "chi",
        'つ' => "tsu",
        'て' => "te",
        'と' => "to",
        'だ' => "da",
        'ぢ' => "ji",
        'づ' => "zu",
        'で' => "de",
        'ど' => "do",
        'な' => "na",
        'に' => "ni",
        'ぬ' => "nu",
        'ね' => "ne",
        'の' => "no",
        'は' => "ha",
        'ひ' => "hi",
        'ふ' => "fu",
        'へ' => "he",
        'ほ' => "ho",
        'ば' => "ba",
        'び' => "bi",
        'ぶ' => "bu",
        'べ' => "be",
        'ぼ' => "bo",
        'ぱ' => "pa",
        'ぴ' => "pi",
        'ぷ' => "pu",
        'ぺ' => "pe",
        'ぽ' => "po",
        'ま' => "ma",
        'み' => "mi",
        'む' => "mu",
        'め' => "me",
        'も' => "mo",
        'や' => "ya",
        'ゆ' => "yu",
        'よ' => "yo",
        'ら' => "ra",
        'り' => "ri",
        'る' => "ru",
        'れ' => "re",
        'ろ' => "ro",
        'わ' => "wa",
        'を' => "o",
        'ん' => "n",
        'ぁ' => "a",
        'ぃ' => "i",
        'ぅ' => "u",
        'ぇ' => "e",
        'ぉ' => "o",
        'ゔ' => "vu",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("こんにちは", "konnichiha")]
    #[case("ありがとう", "arigatou")]
    #[case("ラーメン", "raamen")]
    #[case("コーヒー", "koohii")]
    #[case("きょう", "kyou")]
    #[case("しゃしん", "shashin")]
    #[case("ちゅうい", "chuui")]
    #[case("きって", "kitte")]
    #[case("まっちゃ", "matcha")]
    #[case("日本です", "日本desu")]
    fn test_hepburn_romanization(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(romanize_text(input, TranslitStyle::Hepburn), expected);
    }

    #[test]
    fn test_selective_keeps_hiragana() {
        assert_eq!(
            romanize_text("テレビをみる", TranslitStyle::Selective),
            "terebiをみる"
        );
    }

    #[test]
    fn test_mixed_ascii_untouched() {
        assert_eq!(
            romanize_text("OKです 100%", TranslitStyle::Hepburn),
            "OKdesu 100%"
        );
    }
}
