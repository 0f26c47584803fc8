//! Field-level normalisation for product page attributes.
//!
//! Everything here is infallible: a field that cannot be read degrades to a
//! safe value instead of failing the whole product record.

/// Placeholder the site uses for "no colour" / "no size".
const PLACEHOLDER: &str = "-";
pub const DEFAULT_LABEL: &str = "Standard";

/// Reported for "in stock" without an exact count.
pub const IN_STOCK_SENTINEL: i64 = 99;

const IMAGE_BASE: &str = "https://pic2.bellemaison.jp/shop/cms/images/0000/catalog";
const SKU_PREFIX_LEN: usize = 7;

// ── Prices ────────────────────────────────────────────────────────────────────

/// "6,578" → 6578. Anything unparsable (including negatives) → 0.
pub fn parse_price(s: &str) -> i64 {
    let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
    cleaned
        .parse::<u64>()
        .ok()
        .and_then(|v| i64::try_from(v).ok())
        .unwrap_or(0)
}

// ── Stock ─────────────────────────────────────────────────────────────────────

/// Map the stock status phrase to a count.
///
/// - 在庫あり (in stock) → [`IN_STOCK_SENTINEL`]
/// - 売り切れ / 販売停止 / 売り切れ（再入荷なし） → 0
/// - 在庫：N → N
/// - 入荷予定 (restock expected) → 0
/// - anything else → 0
pub fn parse_stock(description: &str) -> i64 {
    let description = description.trim();
    match description {
        "在庫あり" => IN_STOCK_SENTINEL,
        "売り切れ" | "販売停止" | "売り切れ（再入荷なし）" => 0,
        _ if description.contains("入荷予定") => 0,
        _ => description
            .split_once("在庫：")
            .map(|(_, n)| parse_count(n))
            .unwrap_or(0),
    }
}

fn parse_count(s: &str) -> i64 {
    let digits: String = s.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

// ── Variant labels ────────────────────────────────────────────────────────────

pub fn normalise_label(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        None | Some("") | Some(PLACEHOLDER) => DEFAULT_LABEL.to_string(),
        Some(s) => s.to_string(),
    }
}

/// Size plus the optional secondary qualifier, joined by '/'.
pub fn compose_size(size: Option<&str>, qualifier: Option<&str>) -> String {
    let size = normalise_label(size);
    match qualifier.map(str::trim) {
        Some(q) if !q.is_empty() && q != PLACEHOLDER => format!("{size}/{q}"),
        _ => size,
    }
}

// ── SKU ───────────────────────────────────────────────────────────────────────

/// Split an SKU into (catalogue prefix, style code). The prefix is the
/// product number the image CDN is keyed by.
pub fn split_sku(sku: &str) -> (&str, &str) {
    let sku = sku.trim();
    match sku.char_indices().nth(SKU_PREFIX_LEN) {
        Some((idx, _)) => sku.split_at(idx),
        None => (sku, ""),
    }
}

pub fn fallback_image_url(sku_prefix: &str) -> String {
    format!("{IMAGE_BASE}/{sku_prefix}/{sku_prefix}_h1_001.jpg")
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_price() {
        assert_eq!(parse_price("6,578"), 6578);
        assert_eq!(parse_price("1,234,567"), 1_234_567);
        assert_eq!(parse_price(" 990 "), 990);
        assert_eq!(parse_price(""), 0);
        assert_eq!(parse_price("価格未定"), 0);
        assert_eq!(parse_price("-5"), 0);
    }

    #[test]
    fn test_parse_stock() {
        assert_eq!(parse_stock("在庫あり"), IN_STOCK_SENTINEL);
        assert_eq!(parse_stock("売り切れ"), 0);
        assert_eq!(parse_stock("販売停止"), 0);
        assert_eq!(parse_stock("売り切れ（再入荷なし）"), 0);
        assert_eq!(parse_stock("在庫：4"), 4);
        assert_eq!(parse_stock("残りわずか 在庫：12"), 12);
        assert_eq!(parse_stock("在庫：x"), 0);
        assert_eq!(parse_stock("3月上旬入荷予定"), 0);
        assert_eq!(parse_stock("something new"), 0);
    }

    #[test]
    fn test_labels() {
        assert_eq!(normalise_label(Some("-")), "Standard");
        assert_eq!(normalise_label(None), "Standard");
        assert_eq!(normalise_label(Some("ネイビー")), "ネイビー");
        assert_eq!(compose_size(Some("M"), Some("-")), "M");
        assert_eq!(compose_size(Some("M"), Some("股下68cm")), "M/股下68cm");
        assert_eq!(compose_size(Some("-"), None), "Standard");
    }

    #[test]
    fn test_split_sku() {
        assert_eq!(split_sku("112925001001"), ("1129250", "01001"));
        assert_eq!(split_sku("1129250"), ("1129250", ""));
        assert_eq!(split_sku("12"), ("12", ""));
        assert_eq!(
            fallback_image_url("1129250"),
            "https://pic2.bellemaison.jp/shop/cms/images/0000/catalog/1129250/1129250_h1_001.jpg"
        );
    }
}
