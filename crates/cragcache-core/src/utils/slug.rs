use std::collections::HashSet;

/// Used when a name has no characters that survive slugification
const FALLBACK_SLUG: &str = "crag";

/// Lowercase `name`, fold accented Latin letters to ASCII and collapse every
/// run of other characters into a single `-`, trimming dashes at both ends.
/// The result only ever contains `[a-z0-9-]`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;

    for c in name.chars().flat_map(char::to_lowercase) {
        let folded = if c.is_ascii_alphanumeric() { Some(c.to_string()) } else { fold_latin(c) };
        match folded {
            Some(ascii) => {
                if pending_dash && !slug.is_empty() {
                    slug.push('-');
                }
                pending_dash = false;
                slug.push_str(&ascii);
            }
            None => pending_dash = true,
        }
    }

    slug
}

/// ASCII spelling of a lowercase accented Latin letter.
fn fold_latin(c: char) -> Option<String> {
    let ascii = match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => "a",
        'æ' => "ae",
        'ç' | 'ć' | 'ĉ' | 'ċ' | 'č' => "c",
        'ď' | 'đ' | 'ð' => "d",
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ĕ' | 'ė' | 'ę' | 'ě' => "e",
        'ĝ' | 'ğ' | 'ġ' | 'ģ' => "g",
        'ĥ' | 'ħ' => "h",
        'ì' | 'í' | 'î' | 'ï' | 'ĩ' | 'ī' | 'ĭ' | 'į' | 'ı' => "i",
        'ĵ' => "j",
        'ķ' => "k",
        'ĺ' | 'ļ' | 'ľ' | 'ŀ' | 'ł' => "l",
        'ñ' | 'ń' | 'ņ' | 'ň' => "n",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ŏ' | 'ő' => "o",
        'œ' => "oe",
        'ŕ' | 'ŗ' | 'ř' => "r",
        'ś' | 'ŝ' | 'ş' | 'š' => "s",
        'ß' => "ss",
        'ţ' | 'ť' | 'ŧ' => "t",
        'þ' => "th",
        'ù' | 'ú' | 'û' | 'ü' | 'ũ' | 'ū' | 'ŭ' | 'ů' | 'ű' | 'ų' => "u",
        'ŵ' => "w",
        'ý' | 'ÿ' | 'ŷ' => "y",
        'ź' | 'ż' | 'ž' => "z",
        _ => return None,
    };
    Some(ascii.to_string())
}

/// Slugify `name`, appending `-2`, `-3`, ... until the slug is not in `existing`.
pub fn make_unique_slug(name: &str, existing: &HashSet<String>) -> String {
    let mut base = slugify(name);
    if base.is_empty() {
        base = FALLBACK_SLUG.to_string();
    }
    if !existing.contains(&base) {
        return base;
    }

    (2..)
        .map(|n| format!("{}-{}", base, n))
        .find(|candidate| !existing.contains(candidate))
        .unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Main Face!!"), "main-face");
        assert_eq!(slugify("  --Le Pinacle  du Nord-- "), "le-pinacle-du-nord");
        assert_eq!(slugify("Écrins 2024"), "ecrins-2024");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn test_slugify_is_ascii() {
        assert_eq!(slugify("Große Zinne"), "grosse-zinne");
        assert_eq!(slugify("Łódź Skałki"), "lodz-skalki");
        assert_eq!(slugify("Ærø Øst"), "aero-ost");
        // Scripts without a folding become separators
        assert_eq!(slugify("Fuji 富士 Wall"), "fuji-wall");
        assert_eq!(slugify("富士"), "");
        for name in ["Café Crème", "Peña Ubiña", "Tête à l'Âne"] {
            let slug = slugify(name);
            assert!(slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'), "{}", slug);
        }
    }

    #[test]
    fn test_make_unique_slug() {
        assert_eq!(make_unique_slug("Main Face", &set(&[])), "main-face");
        assert_eq!(make_unique_slug("Main Face", &set(&["main-face"])), "main-face-2");
        assert_eq!(
            make_unique_slug("Main Face", &set(&["main-face", "main-face-2", "main-face-3"])),
            "main-face-4"
        );
        assert_eq!(make_unique_slug("???", &set(&["crag"])), "crag-2");
    }
}
