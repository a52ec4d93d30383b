//! Per-category extraction cascades: ordered tiers against progressively
//! weaker sources, stopping at the first populated result.

use tracing::{debug, info};

use crate::db::Record;
use crate::extract::{
    self, AboutData, PricingData, RetryPolicy, ScheduleData, StructuredExtractor,
};
use crate::fetcher::{FetchedPage, PageFetcher};
use crate::normalize::{extract_candidate_images, normalize};

/// Outcome of one category for one record.
#[derive(Debug, Clone, PartialEq)]
pub enum Attempt<T> {
    NotAttempted,
    Empty,
    Found(T),
}

impl<T> Attempt<T> {
    pub fn is_attempted(&self) -> bool {
        !matches!(self, Attempt::NotAttempted)
    }

    pub fn found(&self) -> Option<&T> {
        match self {
            Attempt::Found(t) => Some(t),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Attempt::NotAttempted => "skipped",
            Attempt::Empty => "nothing found",
            Attempt::Found(_) => "found",
        }
    }
}

pub struct Cascade<'a> {
    fetcher: &'a dyn PageFetcher,
    extractor: &'a dyn StructuredExtractor,
    retry: RetryPolicy,
    max_text_chars: usize,
}

impl<'a> Cascade<'a> {
    pub fn new(
        fetcher: &'a dyn PageFetcher,
        extractor: &'a dyn StructuredExtractor,
        retry: RetryPolicy,
        max_text_chars: usize,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            retry,
            max_text_chars,
        }
    }

    /// Pricing page text, then price images on that page, then the homepage.
    /// When no tier lists a price, the first text result carrying notes
    /// ("ceny ustalane indywidualnie") is still returned.
    pub async fn pricing(&self, record: &Record) -> Attempt<PricingData> {
        let homepage = record.website();
        let Some(url) = record.pricing_hint().or(homepage) else {
            return Attempt::Empty;
        };
        info!(record = %record.id, url, "pricing");
        let mut noted: Option<PricingData> = None;

        if let Some(page) = self.fetcher.fetch(url).await {
            match self.pricing_from_text(&page).await {
                Some(pricing) if pricing.has_prices() => {
                    info!(record = %record.id, tier = "text", ?pricing, "pricing found");
                    return Attempt::Found(pricing);
                }
                other => keep_notes(&mut noted, other),
            }
            if let Some(pricing) = self.pricing_from_images(&page).await {
                info!(record = %record.id, tier = "image", ?pricing, "pricing found");
                return Attempt::Found(pricing);
            }
        }

        if let (Some(hint), Some(home)) = (record.pricing_hint(), homepage) {
            if !same_page(hint, home) {
                info!(record = %record.id, url = home, "trying homepage for pricing");
                if let Some(page) = self.fetcher.fetch(home).await {
                    match self.pricing_from_text(&page).await {
                        Some(pricing) if pricing.has_prices() => {
                            info!(record = %record.id, tier = "homepage", ?pricing, "pricing found");
                            return Attempt::Found(pricing);
                        }
                        other => keep_notes(&mut noted, other),
                    }
                }
            }
        }

        match noted {
            Some(pricing) => {
                info!(record = %record.id, notes = ?pricing.pricing_notes, "no prices listed, keeping notes");
                Attempt::Found(pricing)
            }
            None => {
                info!(record = %record.id, "no pricing found");
                Attempt::Empty
            }
        }
    }

    async fn pricing_from_text(&self, page: &FetchedPage) -> Option<PricingData> {
        let text = normalize(&page.html, self.max_text_chars);
        extract::extract_text::<PricingData>(self.extractor, &text, &self.retry).await
    }

    async fn pricing_from_images(&self, page: &FetchedPage) -> Option<PricingData> {
        let candidates = extract_candidate_images(&page.html, &page.url);
        if candidates.is_empty() {
            return None;
        }
        info!(count = candidates.len(), "text extraction empty, trying images");

        for url in candidates {
            let Some(image) = self.fetcher.fetch_image(&url).await else {
                continue;
            };
            debug!(url = %url, bytes = image.bytes.len(), "visual extraction");
            let found = extract::extract_image::<PricingData>(self.extractor, &image.data_uri())
                .await
                .filter(PricingData::has_prices);
            if found.is_some() {
                return found;
            }
        }
        None
    }

    /// One fetch, one extraction. No fallback tiers.
    pub async fn schedule(&self, record: &Record) -> Attempt<ScheduleData> {
        let Some(url) = record.schedule_hint().or(record.website()) else {
            return Attempt::Empty;
        };
        info!(record = %record.id, url, "schedule");

        let Some(page) = self.fetcher.fetch(url).await else {
            return Attempt::Empty;
        };
        let text = normalize(&page.html, self.max_text_chars);
        match extract::extract_text::<ScheduleData>(self.extractor, &text, &self.retry).await {
            Some(schedule) if !schedule.classes.is_empty() => {
                info!(record = %record.id, classes = schedule.classes.len(), "schedule found");
                Attempt::Found(schedule)
            }
            _ => Attempt::Empty,
        }
    }

    /// Homepage only.
    pub async fn about(&self, record: &Record) -> Attempt<AboutData> {
        let Some(url) = record.website() else {
            return Attempt::Empty;
        };
        info!(record = %record.id, url, "about");

        let Some(page) = self.fetcher.fetch(url).await else {
            return Attempt::Empty;
        };
        let text = normalize(&page.html, self.max_text_chars);
        match extract::extract_text::<AboutData>(self.extractor, &text, &self.retry).await {
            Some(about) if !about.is_empty() => {
                info!(record = %record.id, styles = ?about.styles, "about found");
                Attempt::Found(about)
            }
            _ => Attempt::Empty,
        }
    }
}

fn keep_notes(noted: &mut Option<PricingData>, result: Option<PricingData>) {
    if noted.is_none() {
        *noted = result.filter(|p| p.pricing_notes.is_some());
    }
}

fn same_page(a: &str, b: &str) -> bool {
    let canon = |s: &str| s.trim().trim_end_matches('/').to_lowercase();
    canon(a) == canon(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{self, RecordSeed};
    use crate::error::ExtractError;
    use crate::extract::Category;
    use crate::testing::{page_html, FakeFetcher, ScriptedExtractor};
    use serde_json::json;
    use std::time::Duration;

    const HOME: &str = "https://studio-b.example/";
    const CENNIK: &str = "https://studio-b.example/cennik";

    fn record(pricing_url: Option<&str>, schedule_url: Option<&str>) -> Record {
        let conn = db::test_db();
        db::insert_seeds(
            &conn,
            &[RecordSeed {
                pricing_url: pricing_url.map(String::from),
                schedule_url: schedule_url.map(String::from),
                ..db::seed("studio-b", "Kraków", HOME)
            }],
        )
        .unwrap();
        db::fetch_record(&conn, "studio-b").unwrap().unwrap()
    }

    fn cascade<'a>(f: &'a FakeFetcher, x: &'a ScriptedExtractor) -> Cascade<'a> {
        Cascade::new(f, x, RetryPolicy { retries: 2, base_delay: Duration::ZERO }, 48_000)
    }

    fn no_prices() -> serde_json::Value {
        json!({ "monthly_pass_pln": null, "trial_price_pln": null, "single_class_pln": null })
    }

    #[tokio::test]
    async fn text_tier_wins_without_fallbacks() {
        let fetcher = FakeFetcher::new().page(HOME, &page_html("<p>Karnet 150 zł</p>"));
        let extractor = ScriptedExtractor::new().then(
            Category::Pricing,
            Ok(json!({ "monthly_pass_pln": 150, "single_class_pln": null, "trial_price_pln": 0 })),
        );

        let result = cascade(&fetcher, &extractor).pricing(&record(None, None)).await;
        let pricing = result.found().unwrap();
        assert_eq!(pricing.monthly_pass_pln, Some(150.0));
        assert_eq!(pricing.trial_price_pln, Some(0.0));
        assert_eq!(pricing.single_class_pln, None);
        assert_eq!(fetcher.requested(), vec![HOME]);
    }

    #[tokio::test]
    async fn price_only_in_image_uses_visual_tier() {
        let html = page_html(
            r#"<img src="/uploads/hero.jpg"><img src="/uploads/cennik-2025.jpg">"#,
        );
        let image_url = "https://studio-b.example/uploads/cennik-2025.jpg";
        let fetcher = FakeFetcher::new()
            .page(CENNIK, &html)
            .image(image_url, b"jpeg");
        let extractor = ScriptedExtractor::new()
            .then(Category::Pricing, Ok(no_prices()))
            .then_image(Category::Pricing, Ok(json!({ "single_class_pln": 30 })));

        let result = cascade(&fetcher, &extractor).pricing(&record(Some(CENNIK), None)).await;
        assert_eq!(
            result,
            Attempt::Found(PricingData {
                single_class_pln: Some(30.0),
                ..Default::default()
            })
        );
        assert_eq!(fetcher.requested(), vec![CENNIK, image_url]);
        assert_eq!(extractor.calls(), 2);
    }

    #[tokio::test]
    async fn falls_back_to_homepage_after_images() {
        let fetcher = FakeFetcher::new()
            .page(CENNIK, &page_html("<p>Zapisy przez formularz.</p>"))
            .page(HOME, &page_html("<p>Karnet open 280 zł</p>"));
        let extractor = ScriptedExtractor::new()
            .then(Category::Pricing, Ok(no_prices()))
            .then(Category::Pricing, Ok(json!({ "monthly_pass_pln": 280 })));

        let result = cascade(&fetcher, &extractor).pricing(&record(Some(CENNIK), None)).await;
        assert_eq!(result.found().unwrap().monthly_pass_pln, Some(280.0));
        assert_eq!(fetcher.requested(), vec![CENNIK, HOME]);
    }

    #[tokio::test]
    async fn homepage_hint_is_not_fetched_twice() {
        let fetcher = FakeFetcher::new().page("https://studio-b.example", &page_html(""));
        let extractor = ScriptedExtractor::new().then(Category::Pricing, Ok(no_prices()));

        let result = cascade(&fetcher, &extractor)
            .pricing(&record(Some("https://studio-b.example"), None))
            .await;
        assert_eq!(result, Attempt::Empty);
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(extractor.calls(), 1);
    }

    #[tokio::test]
    async fn notes_survive_when_no_price_is_listed() {
        let fetcher = FakeFetcher::new()
            .page(CENNIK, &page_html("<p>Ceny ustalane indywidualnie.</p>"))
            .page(HOME, &page_html("<p>Zapraszamy.</p>"));
        let extractor = ScriptedExtractor::new()
            .then(
                Category::Pricing,
                Ok(json!({
                    "monthly_pass_pln": null,
                    "trial_price_pln": null,
                    "single_class_pln": null,
                    "pricing_notes": "Ceny ustalane indywidualnie"
                })),
            )
            .then(Category::Pricing, Ok(no_prices()));

        let result = cascade(&fetcher, &extractor).pricing(&record(Some(CENNIK), None)).await;
        assert_eq!(
            result,
            Attempt::Found(PricingData {
                pricing_notes: Some("Ceny ustalane indywidualnie".into()),
                ..Default::default()
            })
        );
        assert_eq!(fetcher.requested(), vec![CENNIK, HOME]);
    }

    #[tokio::test]
    async fn unreachable_site_is_attempted_empty() {
        let fetcher = FakeFetcher::new();
        let extractor = ScriptedExtractor::new();

        let result = cascade(&fetcher, &extractor).pricing(&record(Some(CENNIK), None)).await;
        assert_eq!(result, Attempt::Empty);
        assert!(result.is_attempted());
        assert_eq!(extractor.calls(), 0);
    }

    #[tokio::test]
    async fn extraction_failures_move_to_next_tier() {
        let fetcher = FakeFetcher::new()
            .page(CENNIK, &page_html(""))
            .page(HOME, &page_html("<p>Wejście 35 zł</p>"));
        let extractor = ScriptedExtractor::new()
            .then(Category::Pricing, Err(ExtractError::Network("timeout".into())))
            .then(Category::Pricing, Err(ExtractError::Network("timeout".into())))
            .then(Category::Pricing, Err(ExtractError::Network("timeout".into())))
            .then(Category::Pricing, Ok(json!({ "single_class_pln": "35 zł" })));

        let result = cascade(&fetcher, &extractor).pricing(&record(Some(CENNIK), None)).await;
        assert_eq!(result.found().unwrap().single_class_pln, Some(35.0));
        assert_eq!(extractor.calls(), 4);
    }

    #[tokio::test]
    async fn schedule_uses_hint_once() {
        let grafik = "https://studio-b.example/grafik";
        let fetcher = FakeFetcher::new().page(grafik, &page_html("<table></table>"));
        let extractor = ScriptedExtractor::new().then(
            Category::Schedule,
            Ok(json!({ "classes": [
                { "day": "Poniedziałek", "time": "07:00-08:30", "class_name": "Mysore" }
            ]})),
        );

        let result = cascade(&fetcher, &extractor).schedule(&record(None, Some(grafik))).await;
        assert_eq!(result.found().unwrap().classes.len(), 1);
        assert_eq!(fetcher.requested(), vec![grafik]);
    }

    #[tokio::test]
    async fn empty_schedule_has_no_fallback() {
        let fetcher = FakeFetcher::new().page(HOME, &page_html(""));
        let extractor = ScriptedExtractor::new().then(Category::Schedule, Ok(json!({ "classes": [] })));

        let result = cascade(&fetcher, &extractor).schedule(&record(None, None)).await;
        assert_eq!(result, Attempt::Empty);
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(extractor.calls(), 1);
    }

    #[tokio::test]
    async fn about_reads_homepage() {
        let fetcher = FakeFetcher::new().page(HOME, &page_html(""));
        let extractor = ScriptedExtractor::new().then(
            Category::About,
            Ok(json!({ "properties": {
                "styles": { "type": "array", "items": ["Hatha"] },
                "description_raw": "Kameralne studio.",
                "email": "hej@studio-b.example"
            }})),
        );

        let result = cascade(&fetcher, &extractor)
            .about(&record(Some(CENNIK), None))
            .await;
        let about = result.found().unwrap();
        assert_eq!(about.styles, vec!["Hatha"]);
        assert_eq!(about.email.as_deref(), Some("hej@studio-b.example"));
        assert_eq!(fetcher.requested(), vec![HOME]);
    }
}
