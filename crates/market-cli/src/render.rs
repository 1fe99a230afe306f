//! Plain-text rendering of a listing view.

use std::fmt::Write;

use market_sync::ListingView;
use market_sync::view_model::NO_LISTINGS_MESSAGE;

/// Render `view` as a fixed-width table, or a one-line status.
pub fn render_view(view: &ListingView) -> String {
    match view {
        ListingView::Nothing => "Waiting for sign-in...".to_string(),
        ListingView::NotSignedIn => "Not signed in".to_string(),
        ListingView::Loading => "Loading...".to_string(),
        ListingView::Empty => NO_LISTINGS_MESSAGE.to_string(),
        ListingView::Rows(rows) => {
            let mut out = format!(
                "{:<34} {:<32} {:<10} {:>5} {:>10}  {}\n",
                "ID", "NAME", "CATEGORY", "QTY", "PRICE", "STATUS"
            );
            for row in rows {
                // Writing to a String cannot fail.
                let _ = writeln!(
                    out,
                    "{:<34} {:<32} {:<10} {:>5} {:>10.2}  {}",
                    row.id,
                    truncate(&row.name, 32),
                    truncate(&row.category, 10),
                    row.quantity,
                    row.selling_price,
                    row.badge()
                );
            }
            out.pop();
            out
        }
    }
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(width.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}
