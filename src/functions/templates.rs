use crate::models::notification::{LoginNotification, OrderNotification};

/// Subject line plus HTML body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
}

/// Escapes the five HTML-significant characters.
pub fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

pub fn format_price(cents: i64, currency: &str) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    let amount = format!("{sign}{}.{:02}", abs / 100, abs % 100);
    match currency.to_lowercase().as_str() {
        "usd" => format!("${amount}"),
        "eur" => format!("€{amount}"),
        "gbp" => format!("£{amount}"),
        other => format!("{amount} {}", other.to_uppercase()),
    }
}

fn layout(heading: &str, rows: &[(&str, String)], footer: &str) -> String {
    let rows_html: String = rows
        .iter()
        .map(|(label, value)| {
            format!(
                "<tr><td style=\"padding:4px 12px 4px 0;color:#6b5b95\"><strong>{label}</strong></td><td style=\"padding:4px 0\">{value}</td></tr>"
            )
        })
        .collect();

    format!(
        "<!DOCTYPE html><html><body style=\"font-family:Georgia,serif;background:#faf7ff;color:#2d2140\">\
<div style=\"max-width:560px;margin:0 auto;padding:24px\">\
<h1 style=\"font-size:22px;color:#4b3b78\">{heading}</h1>\
<table>{rows_html}</table>\
<p style=\"margin-top:24px;font-size:13px;color:#7a6f8f\">{footer}</p>\
</div></body></html>"
    )
}

pub fn login_alert(notification: &LoginNotification) -> RenderedEmail {
    RenderedEmail {
        subject: "New sign-in to your Astral admin account".to_string(),
        html: layout(
            "New admin sign-in",
            &[
                ("Account", escape_html(notification.email.trim())),
                ("Time", escape_html(notification.login_time.trim())),
            ],
            "If this was not you, reset your password and review recent orders.",
        ),
    }
}

fn order_rows(order: &OrderNotification) -> Vec<(&'static str, String)> {
    let mut rows = Vec::new();
    if let Some(id) = order.order_id.as_deref().filter(|id| !id.trim().is_empty()) {
        rows.push(("Order", escape_html(id.trim())));
    }
    rows.push(("Reading", escape_html(order.product_name.trim())));
    rows.push(("Total", escape_html(&format_price(order.final_price_cents, &order.currency))));
    if let Some(date) = order.birth_date.as_deref().filter(|v| !v.trim().is_empty()) {
        rows.push(("Birth date", escape_html(date.trim())));
    }
    if let Some(time) = order.birth_time.as_deref().filter(|v| !v.trim().is_empty()) {
        rows.push(("Birth time", escape_html(time.trim())));
    }
    if let Some(place) = order.birth_place.as_deref().filter(|v| !v.trim().is_empty()) {
        rows.push(("Birth place", escape_html(place.trim())));
    }
    rows
}

pub fn order_confirmation(order: &OrderNotification) -> RenderedEmail {
    let heading = format!("Thank you, {}!", escape_html(order.customer_name.trim()));
    RenderedEmail {
        subject: format!("Your {} order is confirmed", order.product_name.trim()),
        html: layout(
            &heading,
            &order_rows(order),
            "Your reading is being prepared. We will email you as soon as it is ready.",
        ),
    }
}

pub fn order_admin_alert(order: &OrderNotification) -> RenderedEmail {
    let mut rows = vec![
        ("Customer", escape_html(order.customer_name.trim())),
        ("Email", escape_html(order.customer_email.trim())),
    ];
    rows.extend(order_rows(order));
    if let Some(code) = order.referral_code.as_deref().filter(|v| !v.trim().is_empty()) {
        rows.push(("Referral", escape_html(code.trim())));
    }

    RenderedEmail {
        subject: format!(
            "New order: {} ({})",
            order.product_name.trim(),
            format_price(order.final_price_cents, &order.currency)
        ),
        html: layout("New order received", &rows, "Sent by the storefront order function."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> OrderNotification {
        OrderNotification {
            order_id: Some("ord_1".into()),
            customer_name: "<script>alert(1)</script>".into(),
            customer_email: "ada@example.com".into(),
            product_name: "Natal chart".into(),
            final_price_cents: 4_410,
            currency: "usd".into(),
            birth_date: Some("1990-12-10".into()),
            birth_time: None,
            birth_place: Some("London & Paris".into()),
            referral_code: Some("LUNA10".into()),
        }
    }

    #[test]
    fn user_values_are_escaped() {
        let email = order_confirmation(&order());
        assert!(email.html.contains("&lt;script&gt;"));
        assert!(!email.html.contains("<script>"));
        assert!(email.html.contains("London &amp; Paris"));
        assert_eq!(email.subject, "Your Natal chart order is confirmed");
    }

    #[test]
    fn prices_render_from_cents() {
        assert_eq!(format_price(4_410, "usd"), "$44.10");
        assert_eq!(format_price(5, "EUR"), "€0.05");
        assert_eq!(format_price(1_000, "jpy"), "10.00 JPY");
    }

    #[test]
    fn admin_alert_includes_referral_and_customer() {
        let email = order_admin_alert(&order());
        assert!(email.html.contains("LUNA10"));
        assert!(email.html.contains("ada@example.com"));
        assert_eq!(email.subject, "New order: Natal chart ($44.10)");
    }
}
