use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// An independent enrichment dimension with its own cascade and merge rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Pricing,
    Schedule,
    About,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Pricing => "pricing",
            Category::Schedule => "schedule",
            Category::About => "about",
        }
    }

    pub fn instruction(&self) -> &'static str {
        match self {
            Category::Pricing => PRICING_INSTRUCTION,
            Category::Schedule => SCHEDULE_INSTRUCTION,
            Category::About => ABOUT_INSTRUCTION,
        }
    }

    pub fn max_tokens(&self) -> u32 {
        match self {
            Category::Schedule => 8000,
            Category::Pricing | Category::About => 2000,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A schema-constrained result type for one category.
pub trait Payload: DeserializeOwned + JsonSchema + Send {
    const CATEGORY: Category;

    /// Drop or normalize values the model produced but the store can't use.
    fn validated(self) -> Self;
}

// ── Pricing ──

/// Extracted from a studio's pricing (cennik) page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PricingData {
    /// Price of the largest unlimited/open pass in PLN. Prefer 'karnet open' or
    /// 'bez limitu'. If only N-entry passes exist, pick the largest one.
    #[serde(default, deserialize_with = "lenient_price")]
    #[schemars(with = "Option<f64>")]
    pub monthly_pass_pln: Option<f64>,

    /// Price for the first trial class in PLN. 0 means free, null if not offered.
    #[serde(default, deserialize_with = "lenient_price")]
    #[schemars(with = "Option<f64>")]
    pub trial_price_pln: Option<f64>,

    /// Price for a single drop-in class in PLN, if listed.
    #[serde(default, deserialize_with = "lenient_price")]
    #[schemars(with = "Option<f64>")]
    pub single_class_pln: Option<f64>,

    /// Important pricing caveats, e.g. 'Studenci: -20%'. Written in Polish.
    #[serde(default, deserialize_with = "lenient_text")]
    #[schemars(with = "Option<String>")]
    pub pricing_notes: Option<String>,
}

impl PricingData {
    /// Any price field present. An explicit 0 (free trial) counts.
    pub fn has_prices(&self) -> bool {
        self.monthly_pass_pln.is_some()
            || self.trial_price_pln.is_some()
            || self.single_class_pln.is_some()
    }
}

impl Payload for PricingData {
    const CATEGORY: Category = Category::Pricing;

    fn validated(self) -> Self {
        let price = |p: Option<f64>| p.filter(|v| v.is_finite() && *v >= 0.0);
        PricingData {
            monthly_pass_pln: price(self.monthly_pass_pln),
            trial_price_pln: price(self.trial_price_pln),
            single_class_pln: price(self.single_class_pln),
            pricing_notes: self.pricing_notes,
        }
    }
}

// ── Schedule ──

/// A single class in the weekly schedule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScheduleEntry {
    /// Day of the week in Polish, e.g. 'Poniedziałek'.
    #[serde(default, deserialize_with = "lenient_string")]
    #[schemars(with = "String")]
    pub day: String,

    /// Start-end time, e.g. '07:00-08:30'.
    #[serde(default, deserialize_with = "lenient_string")]
    #[schemars(with = "String")]
    pub time: String,

    /// Name of the class, e.g. 'Mysore Ashtanga'.
    #[serde(default, deserialize_with = "lenient_string")]
    #[schemars(with = "String")]
    pub class_name: String,

    /// Instructor name if listed.
    #[serde(default, deserialize_with = "lenient_text")]
    #[schemars(with = "Option<String>")]
    pub instructor: Option<String>,

    /// Level if specified, e.g. 'Początkujący'.
    #[serde(default, deserialize_with = "lenient_text")]
    #[schemars(with = "Option<String>")]
    pub level: Option<String>,
}

/// Extracted from a studio's schedule (grafik) page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScheduleData {
    /// All weekly classes visible on the schedule page.
    #[serde(default)]
    pub classes: Vec<ScheduleEntry>,
}

impl Payload for ScheduleData {
    const CATEGORY: Category = Category::Schedule;

    fn validated(self) -> Self {
        let classes = self
            .classes
            .into_iter()
            .filter(|c| {
                !c.day.is_empty() && !c.time.is_empty() && !c.class_name.is_empty()
            })
            .collect();
        ScheduleData { classes }
    }
}

// ── About ──

/// Extracted from a studio's main/about page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AboutData {
    /// Yoga styles offered, using standard names: Ashtanga, Vinyasa, Hatha,
    /// Iyengar, Kundalini, Yin, Yin/Restorative, Aerial, Hot Yoga, Pregnancy,
    /// Nidra, Mysore, Power Yoga.
    #[serde(default, deserialize_with = "lenient_list")]
    #[schemars(with = "Vec<String>")]
    pub styles: Vec<String>,

    /// The studio's own description, copied verbatim.
    #[serde(default, deserialize_with = "lenient_string")]
    #[schemars(with = "String")]
    pub description_raw: String,

    /// Phone number if found on the page.
    #[serde(default, deserialize_with = "lenient_text")]
    #[schemars(with = "Option<String>")]
    pub phone: Option<String>,

    /// Email address if found on the page.
    #[serde(default, deserialize_with = "lenient_text")]
    #[schemars(with = "Option<String>")]
    pub email: Option<String>,
}

impl AboutData {
    pub fn is_empty(&self) -> bool {
        self.styles.is_empty()
            && self.description_raw.is_empty()
            && self.phone.is_none()
            && self.email.is_none()
    }
}

impl Payload for AboutData {
    const CATEGORY: Category = Category::About;

    fn validated(self) -> Self {
        let mut styles: Vec<String> = Vec::with_capacity(self.styles.len());
        for style in self.styles {
            let style = style.trim().to_string();
            if !style.is_empty() && !styles.contains(&style) {
                styles.push(style);
            }
        }
        AboutData {
            styles,
            description_raw: self.description_raw,
            phone: self.phone,
            email: self.email,
        }
    }
}

// ── Lenient field decoding ──

/// Accepts numbers and price-like strings ("150 zł", "29,99"). Anything else
/// decodes to None instead of failing the whole payload.
fn lenient_price<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_price(&s),
        _ => None,
    })
}

/// Optional free text: trimmed, empty becomes None, numbers are stringified.
fn lenient_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// A list of strings; null, a bare string or mixed items are tolerated.
fn lenient_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    let items = match Value::deserialize(d)? {
        Value::Array(items) => items,
        Value::String(s) => s.split(',').map(|p| Value::String(p.to_string())).collect(),
        _ => Vec::new(),
    };
    Ok(items
        .into_iter()
        .filter_map(|v| match v {
            Value::String(s) => Some(s.trim().to_string()),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect())
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(lenient_text(d)?.unwrap_or_default())
}

/// First number in `s`. With both `.` and `,` present the last one is the
/// decimal point; a lone separator before exactly three digits groups
/// thousands ("1.200 zł").
pub fn parse_price(s: &str) -> Option<f64> {
    let raw: String = s
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | ' ' | '\u{a0}'))
        .filter(|c| !c.is_whitespace())
        .collect();
    let raw = raw.trim_end_matches(&['.', ','][..]);
    let is_sep = |c: char| c == '.' || c == ',';

    let number = match raw.rfind(is_sep) {
        None => raw.to_string(),
        Some(last) => {
            let sep = &raw[last..last + 1];
            let mixed = raw.contains('.') && raw.contains(',');
            if mixed {
                format!("{}.{}", raw[..last].replace(is_sep, ""), &raw[last + 1..])
            } else if raw.matches(sep).count() > 1 || raw.len() - last - 1 == 3 {
                raw.replace(sep, "")
            } else {
                raw.replace(sep, ".")
            }
        }
    };
    number.parse().ok()
}

// ── Instructions ──

const PRICING_INSTRUCTION: &str = "\
Extract yoga/fitness studio pricing from this page. The page may be in Polish or English.

RULES:
1. monthly_pass_pln - the LARGEST unlimited/open pass (karnet open, bez limitu, unlimited, monthly). \
If only N-entry passes exist (e.g. 4, 8, 12 entries), pick the LARGEST one.
2. single_class_pln - a single drop-in class (1 wejście, single entrance, jedne zajęcia).
3. trial_price_pln - first/trial class (pierwsze zajęcia, trial, intro). 0 = free. null = not listed.
4. pricing_notes - key details: pass validity, discounts (student/senior), other pass tiers. Write in Polish.

Prices are in PLN (zł). Look for numbers followed by 'zł', 'PLN' or 'złotych'. \
If prices appear in tabs/sections, prefer the Open/unlimited tier. \
Do not return null if prices are visible on the page.";

const SCHEDULE_INSTRUCTION: &str = "\
Extract the full weekly class schedule from this yoga studio page. \
Each entry has: day (Polish), time range, class name, instructor (if listed), level (if listed). \
Extract ALL classes visible on the schedule. Days are in Polish (Poniedziałek, Wtorek, etc.). \
If the schedule is a table, extract every row. If it is a list, extract every item.";

const ABOUT_INSTRUCTION: &str = "\
Extract the yoga studio's description, yoga styles offered, contact phone and email from this page. \
For styles, use standard names: Ashtanga, Vinyasa, Hatha, Iyengar, Kundalini, Yin, Yin/Restorative, \
Aerial, Hot Yoga, Pregnancy, Nidra, Mysore, Power Yoga. \
Copy the studio's own description verbatim, do not summarize. \
All text output must be in Polish.";

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prices_decode_from_strings() {
        let p: PricingData = serde_json::from_value(json!({
            "monthly_pass_pln": "250 zł",
            "trial_price_pln": 0,
            "single_class_pln": "39,50",
            "pricing_notes": "  "
        }))
        .unwrap();
        assert_eq!(p.monthly_pass_pln, Some(250.0));
        assert_eq!(p.trial_price_pln, Some(0.0));
        assert_eq!(p.single_class_pln, Some(39.5));
        assert_eq!(p.pricing_notes, None);
        assert!(p.has_prices());
    }

    #[test]
    fn unparseable_price_is_none_not_error() {
        let p: PricingData =
            serde_json::from_value(json!({ "monthly_pass_pln": "zapytaj na recepcji" })).unwrap();
        assert_eq!(p.monthly_pass_pln, None);
        assert!(!p.has_prices());
    }

    #[test]
    fn parse_price_handles_separators() {
        assert_eq!(parse_price("1 200 zł"), Some(1200.0));
        assert_eq!(parse_price("od 45 PLN"), Some(45.0));
        assert_eq!(parse_price("brak"), None);
        assert_eq!(parse_price("29,99 zł"), Some(29.99));
        assert_eq!(parse_price("45."), Some(45.0));
    }

    #[test]
    fn parse_price_reads_thousands_groups() {
        assert_eq!(parse_price("1.200 zł"), Some(1200.0));
        assert_eq!(parse_price("1,200 PLN"), Some(1200.0));
        assert_eq!(parse_price("1.200,00 zł"), Some(1200.0));
        assert_eq!(parse_price("1,200.50"), Some(1200.5));
        assert_eq!(parse_price("1.250.000"), Some(1_250_000.0));
        assert_eq!(parse_price("12,5 zł"), Some(12.5));
    }

    #[test]
    fn negative_prices_are_dropped() {
        let p = PricingData {
            monthly_pass_pln: Some(-1.0),
            single_class_pln: Some(30.0),
            ..Default::default()
        }
        .validated();
        assert_eq!(p.monthly_pass_pln, None);
        assert_eq!(p.single_class_pln, Some(30.0));
    }

    #[test]
    fn incomplete_schedule_entries_are_dropped() {
        let s: ScheduleData = serde_json::from_value(json!({
            "classes": [
                { "day": "Poniedziałek", "time": "07:00-08:30", "class_name": "Mysore" },
                { "day": "Wtorek", "time": "", "class_name": "Hatha" },
                { "day": "Środa", "time": "18:00-19:30", "class_name": "Vinyasa", "instructor": "Ola" }
            ]
        }))
        .unwrap();
        let s = s.validated();
        assert_eq!(s.classes.len(), 2);
        assert_eq!(s.classes[1].instructor.as_deref(), Some("Ola"));
    }

    #[test]
    fn about_styles_are_deduplicated() {
        let a: AboutData = serde_json::from_value(json!({
            "styles": ["Hatha", " Hatha", "Yin", ""],
            "description_raw": "Studio w centrum.",
            "phone": 123456789
        }))
        .unwrap();
        let a = a.validated();
        assert_eq!(a.styles, vec!["Hatha", "Yin"]);
        assert_eq!(a.phone.as_deref(), Some("123456789"));
        assert!(!a.is_empty());
    }

    #[test]
    fn styles_tolerate_odd_shapes() {
        let a: AboutData = serde_json::from_value(json!({ "styles": null })).unwrap();
        assert!(a.styles.is_empty());
        let a: AboutData = serde_json::from_value(json!({ "styles": "Yin, Hatha" })).unwrap();
        assert_eq!(a.styles, vec!["Yin", "Hatha"]);
    }

    #[test]
    fn schema_lists_category_fields() {
        let schema = serde_json::to_value(schemars::schema_for!(PricingData)).unwrap();
        let props = schema["properties"].as_object().unwrap();
        assert!(props.contains_key("monthly_pass_pln"));
        assert!(props.contains_key("pricing_notes"));
    }
}
