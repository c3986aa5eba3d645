//! Prompt assembly for the summarizer and both chat responders.
//!
//! Everything here is a pure function of its inputs so prompts can be
//! asserted on in tests without a provider.

use crate::completion::PromptMessage;
use crate::models::Order;

/// Order context used when a user has no persisted summary.
pub const NO_ORDERS_SUMMARY: &str = "No orders found for this user yet.";

/// Number of orders rendered in the detailed order context.
pub const DETAILED_ORDER_LIMIT: usize = 5;

/// Phrases that ask about a specific order in the sequence.
const ORDER_DETAIL_KEYWORDS: &[&str] = &[
    "second last",
    "second to last",
    "previous order",
    "before that",
    "third order",
    "last 3 orders",
    "order before",
    "earlier order",
    "what did i buy before",
    "my order history",
    "list my orders",
    "show my orders",
    "order details",
    "which order",
    "what order",
];

fn order_items(order: &Order) -> Vec<String> {
    order
        .items
        .iter()
        .map(|i| format!("{}x {} (Category: {})", i.quantity, i.product_name, i.category))
        .collect()
}

/// One line of the summarizer's order-history block.
///
/// ```rust
/// use chrono::{TimeZone, Utc};
/// use fusion_core::models::{Order, OrderItem};
/// use fusion_core::prompt::render_order_line;
///
/// let order = Order {
///     id: 42,
///     user_id: 1,
///     created_at: Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap(),
///     total_price: 59.9,
///     paid: true,
///     status: "Shipped".to_string(),
///     items: vec![OrderItem {
///         product_name: "Desk Lamp".to_string(),
///         category: "Home".to_string(),
///         quantity: 2,
///         price: 29.95,
///     }],
/// };
/// assert_eq!(
///     render_order_line(&order),
///     "- Order #42 on 2024-03-09: Items: 2x Desk Lamp (Category: Home). Status: Shipped. Total: $59.90"
/// );
/// ```
pub fn render_order_line(order: &Order) -> String {
    format!(
        "- Order #{} on {}: Items: {}. Status: {}. Total: ${:.2}",
        order.id,
        order.created_at.format("%Y-%m-%d"),
        order_items(order).join(", "),
        order.status,
        order.total_price
    )
}

/// The full order-history block, one line per order, in the given order.
pub fn render_order_history(orders: &[Order]) -> String {
    orders
        .iter()
        .map(render_order_line)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Prompt asking for a digest of a customer's order history.
pub fn summary_prompt(order_history: &str) -> String {
    format!(
        "Based on the following order history for a customer, write a concise summary that covers:

1. Their orders with order numbers and key items, most recent first
2. Purchasing patterns and favourite product categories
3. Order frequency and typical purchase amounts
4. The status of their most recent order

The summary should make it possible to answer questions like \"what was my second last order\" \
or \"what did I buy before that\".

Order History:
{order_history}

Provide the summary as one short paragraph:"
    )
}

/// Whether a message asks about a specific order in the sequence.
pub fn wants_order_details(message: &str) -> bool {
    let lower = message.to_lowercase();
    ORDER_DETAIL_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Positional label for the `n`th most recent order, 1-based.
pub fn order_position_label(n: usize) -> String {
    match n {
        1 => "Most recent order (latest)".to_string(),
        2 => "Second last order".to_string(),
        3 => "Third last order".to_string(),
        _ => format!("Order from {} orders ago", n),
    }
}

/// The last [`DETAILED_ORDER_LIMIT`] orders with positional labels.
/// `orders` must be most recent first.
pub fn render_detailed_orders(orders: &[Order]) -> String {
    if orders.is_empty() {
        return "No orders found for this user.".to_string();
    }
    orders
        .iter()
        .take(DETAILED_ORDER_LIMIT)
        .enumerate()
        .map(|(i, order)| {
            format!(
                "{}: Order #{} placed on {} - Items: {}. Total: ${:.2}. Status: {}",
                order_position_label(i + 1),
                order.id,
                order.created_at.format("%Y-%m-%d"),
                order_items(order).join(", "),
                order.total_price,
                order.status
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// System prompt for the order/general responder.
pub fn order_system_prompt(
    bot_name: &str,
    user_name: &str,
    order_summary: Option<&str>,
    detailed_orders: Option<&str>,
) -> String {
    let summary = order_summary
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(NO_ORDERS_SUMMARY);

    let mut prompt = format!(
        "You are \"{bot_name}\", a friendly and helpful AI assistant for our e-commerce store, \"Fusion\".
The user you are chatting with is named {user_name}.

Here is an AI-generated summary of their RECENT ORDER HISTORY. Use this for context:
<order_summary>
{summary}
</order_summary>"
    );

    if let Some(detailed) = detailed_orders {
        prompt.push_str(&format!(
            "

DETAILED ORDER HISTORY (for specific order questions):
<detailed_orders>
{detailed}
</detailed_orders>

Use this detailed information to answer questions about their order sequence, like \"what was my \
second last order\" or \"what did I buy before that\". Be precise with order numbers, dates, and items."
        ));
    }

    prompt.push_str(
        "

You have access to the full conversation history. Keep your responses friendly and concise. \
When users ask about their orders or purchase history, refer to the order information above and \
be as specific as possible.",
    );
    prompt
}

/// System prompt for the document-grounded responder.
pub fn rag_system_prompt(bot_name: &str, context_chunks: &[String]) -> String {
    let context = if context_chunks.is_empty() {
        "(no matching documents)".to_string()
    } else {
        context_chunks
            .iter()
            .enumerate()
            .map(|(i, c)| format!("[{}]\n{}", i + 1, c.trim()))
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    format!(
        "You are \"{bot_name}\", the assistant for the e-commerce store \"Fusion\".
Answer the customer's question using ONLY the context below, taken from the store's documents.
If the answer is not in the context, say explicitly that you could not find it in the store's \
documents. Do not make anything up.

<context>
{context}
</context>"
    )
}

/// System prompt, then `history`, then the new user message.
pub fn with_history(
    system: String,
    history: &[PromptMessage],
    message: &str,
) -> Vec<PromptMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(PromptMessage::system(system));
    messages.extend_from_slice(history);
    messages.push(PromptMessage::user(message));
    messages
}

/// The last `turns` entries of `history`.
pub fn trailing(history: &[PromptMessage], turns: usize) -> &[PromptMessage] {
    &history[history.len().saturating_sub(turns)..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::Role;
    use crate::models::OrderItem;
    use chrono::{Duration, TimeZone, Utc};

    fn order(id: i64, days_ago: i64, name: &str) -> Order {
        Order {
            id,
            user_id: 1,
            created_at: Utc.with_ymd_and_hms(2024, 6, 30, 10, 0, 0).unwrap() - Duration::days(days_ago),
            total_price: 10.0 * id as f64,
            paid: true,
            status: "Shipped".to_string(),
            items: vec![
                OrderItem {
                    product_name: name.to_string(),
                    category: "Gadgets".to_string(),
                    quantity: 1,
                    price: 10.0,
                },
                OrderItem {
                    product_name: "Cable".to_string(),
                    category: "Accessories".to_string(),
                    quantity: 3,
                    price: 2.5,
                },
            ],
        }
    }

    #[test]
    fn test_history_lines_join_items() {
        let text = render_order_history(&[order(2, 0, "Phone"), order(1, 5, "Tablet")]);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "- Order #2 on 2024-06-30: Items: 1x Phone (Category: Gadgets), 3x Cable (Category: Accessories). Status: Shipped. Total: $20.00"
        );
        assert!(lines[1].starts_with("- Order #1 on 2024-06-25"));
    }

    #[test]
    fn test_summary_prompt_embeds_history() {
        let p = summary_prompt("- Order #1 on 2024-01-01: Items: 1x A (Category: B). Status: Shipped. Total: $1.00");
        assert!(p.contains("Order History:\n- Order #1"));
    }

    #[test]
    fn test_no_summary_uses_fallback() {
        let p = order_system_prompt("FusionBot", "maya", None, None);
        assert!(p.contains(NO_ORDERS_SUMMARY));
        assert!(p.contains("named maya"));
        assert!(!p.contains("<detailed_orders>"));

        let blank = order_system_prompt("FusionBot", "maya", Some("   "), None);
        assert!(blank.contains(NO_ORDERS_SUMMARY));
    }

    #[test]
    fn test_summary_and_details_included() {
        let p = order_system_prompt("FusionBot", "Maya", Some("Buys lamps."), Some("Most recent order (latest): ..."));
        assert!(p.contains("<order_summary>\nBuys lamps.\n</order_summary>"));
        assert!(p.contains("<detailed_orders>\nMost recent order (latest): ...\n</detailed_orders>"));
        assert!(!p.contains(NO_ORDERS_SUMMARY));
    }

    #[test]
    fn test_order_detail_keywords() {
        assert!(wants_order_details("What was my SECOND LAST order?"));
        assert!(wants_order_details("can you list my orders"));
        assert!(!wants_order_details("what's your return policy"));
    }

    #[test]
    fn test_detailed_orders_labels_and_limit() {
        let orders: Vec<Order> = (1..=7).rev().map(|id| order(id, 7 - id, "Item")).collect();
        let text = render_detailed_orders(&orders);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), DETAILED_ORDER_LIMIT);
        assert!(lines[0].starts_with("Most recent order (latest): Order #7"));
        assert!(lines[1].starts_with("Second last order: Order #6"));
        assert!(lines[2].starts_with("Third last order: Order #5"));
        assert!(lines[4].starts_with("Order from 5 orders ago: Order #3"));
        assert_eq!(render_detailed_orders(&[]), "No orders found for this user.");
    }

    #[test]
    fn test_rag_prompt_numbers_context() {
        let p = rag_system_prompt("FusionBot", &["Returns within 30 days.".to_string(), "Ships in 2 days.".to_string()]);
        assert!(p.contains("[1]\nReturns within 30 days."));
        assert!(p.contains("[2]\nShips in 2 days."));
        assert!(p.contains("ONLY the context"));
        assert!(rag_system_prompt("FusionBot", &[]).contains("(no matching documents)"));
    }

    #[test]
    fn test_with_history_and_trailing() {
        let history = vec![
            PromptMessage::user("a"),
            PromptMessage::assistant("b"),
            PromptMessage::user("c"),
            PromptMessage::assistant("d"),
        ];
        assert_eq!(trailing(&history, 2), &history[2..]);
        assert_eq!(trailing(&history, 10).len(), 4);

        let msgs = with_history("sys".to_string(), trailing(&history, 2), "e");
        let roles: Vec<Role> = msgs.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
        assert_eq!(msgs.last().unwrap().content, "e");
    }
}
