use crate::models::{ScrapeError, ScrapedProduct, ScrapedStyle};
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::{debug, warn};

use super::cleaner::{
    compose_size, fallback_image_url, normalise_label, parse_price, parse_stock, split_sku,
};

/// Heading text the site renders in place of a removed product.
pub const NOT_FOUND_MARKER: &str = "お探しの商品が見つかりません";

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParseError {
    #[error("invalid selector {0:?}")]
    Selector(String),

    #[error("missing {0}")]
    MissingElement(&'static str),
}

fn selector(s: &str) -> Result<Selector, ParseError> {
    Selector::parse(s).map_err(|_| ParseError::Selector(s.to_string()))
}

struct Selectors {
    not_found: Selector,
    name: Selector,
    variant_area: Selector,
    variant: Selector,
    colour_list: Selector,
    colour_radio: Selector,
}

impl Selectors {
    fn new() -> Result<Self, ParseError> {
        Ok(Self {
            not_found: selector("h1.title")?,
            name: selector("h1.product-name.text-weight-bold")?,
            variant_area: selector("#commodityStandardAreaMessage")?,
            variant: selector(".standard-info")?,
            colour_list: selector(".variation-list_item input[name='color']")?,
            colour_radio: selector(".variation-check-radio input[name='color']")?,
        })
    }
}

fn text_of(el: ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}

// ── Product page ──────────────────────────────────────────────────────────────

/// Parse a product page into a [`ScrapedProduct`].
///
/// Returns [`ScrapeError::NotFound`] when the page carries the "not found"
/// heading, and [`ScrapeError::Parse`] when the variant section is missing.
pub fn parse_product_page(html: &[u8]) -> Result<ScrapedProduct, ScrapeError> {
    let sel = Selectors::new()?;
    let doc = Html::parse_document(&String::from_utf8_lossy(html));

    if doc
        .select(&sel.not_found)
        .any(|h| text_of(h) == NOT_FOUND_MARKER)
    {
        return Err(ScrapeError::NotFound);
    }

    let name = doc.select(&sel.name).next().map(text_of).unwrap_or_default();
    if name.is_empty() {
        warn!("product page without a name heading");
    }

    let area = doc
        .select(&sel.variant_area)
        .next()
        .and_then(|el| el.parent())
        .and_then(ElementRef::wrap)
        .ok_or(ParseError::MissingElement("variant area"))?;

    let styles: Vec<ScrapedStyle> = area
        .select(&sel.variant)
        .map(|info| parse_variant(info, &sel))
        .collect();

    debug!("{}: {} styles", name, styles.len());
    Ok(ScrapedProduct { name, styles })
}

fn parse_variant(info: ElementRef, sel: &Selectors) -> ScrapedStyle {
    let attr = |name: &str| info.value().attr(name);

    let colour = normalise_label(attr("data-standard-detail2"));
    let size = compose_size(attr("data-standard-detail1"), attr("data-standard-detail12"));
    let price = attr("data-price").map(parse_price).unwrap_or(0);
    let stock = attr("data-stock-status").map(parse_stock).unwrap_or(0);
    let (sku_prefix, style_code) = split_sku(attr("data-nucleus-sku-code").unwrap_or(""));

    let image_url = sibling_image(info, &sel.colour_list, &colour)
        .or_else(|| sibling_image(info, &sel.colour_radio, &colour))
        .unwrap_or_else(|| fallback_image_url(sku_prefix));

    ScrapedStyle {
        style_code: style_code.to_string(),
        image_url,
        colour,
        size,
        price,
        stock,
    }
}

/// Look through the variant block's siblings for a colour swatch whose
/// `data-name` matches `colour`, returning its `data-img`.
fn sibling_image(info: ElementRef, inputs: &Selector, colour: &str) -> Option<String> {
    info.prev_siblings()
        .chain(info.next_siblings())
        .filter_map(ElementRef::wrap)
        .flat_map(|sibling| sibling.select(inputs))
        .filter(|input| input.value().attr("data-name") == Some(colour))
        .find_map(|input| input.value().attr("data-img"))
        .filter(|img| !img.is_empty())
        .map(str::to_string)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
