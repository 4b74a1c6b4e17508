//! System prompt construction
//!
//! Every LLM call gets the same persona instructions, followed by the
//! store information from configuration and, when present, the products
//! relevant to the conversation.

use crate::config::StoreInfo;
use crate::storage::ProductCard;
use std::fmt::Write as _;

/// Fixed persona instructions for the shopping assistant
pub const SYSTEM_PROMPT: &str = "You are a friendly and knowledgeable e-commerce shopping assistant. Your role is to help customers find products, answer questions about store policies, and provide excellent customer service.

Guidelines:
- Be conversational, helpful, and concise
- When recommending products, focus on the customer's needs and preferences
- Provide accurate information about store policies when asked
- If you don't know something, admit it rather than making up information
- Be proactive in suggesting relevant products based on the conversation
- Keep responses brief but informative (2-3 sentences typically)";

/// Build the full system prompt for one completion call
///
/// # Examples
///
/// ```
/// use talkai::config::StoreInfo;
/// use talkai::prompts::build_system_prompt;
///
/// let store = StoreInfo::default();
/// let prompt = build_system_prompt(&store, &[]);
/// assert!(prompt.contains("## Store Information:"));
/// assert!(prompt.contains(&store.name));
/// ```
pub fn build_system_prompt(store: &StoreInfo, products: &[ProductCard]) -> String {
    let mut prompt = String::from(SYSTEM_PROMPT);

    prompt.push_str("\n\n## Store Information:\n");
    let _ = writeln!(prompt, "Name: {}", store.name);
    let _ = writeln!(prompt, "Description: {}", store.description);
    if let Some(hours) = &store.hours {
        let _ = writeln!(prompt, "Hours: {}", hours);
    }
    if !store.locations.is_empty() {
        let _ = writeln!(prompt, "Locations: {}", store.locations.join(", "));
    }

    if !store.policies.is_empty() {
        prompt.push_str("\n## Store Policies:\n");
        for (key, value) in &store.policies {
            let _ = writeln!(prompt, "{}: {}", key, value);
        }
    }

    if !products.is_empty() {
        prompt.push_str("\n## Relevant Products for this conversation:\n");
        for product in products {
            let _ = writeln!(prompt, "\n- {}", product.title);
            let _ = writeln!(prompt, "  Price: {}", product.price);
            let _ = writeln!(
                prompt,
                "  Rating: {}/5 ({} reviews)",
                product.rating, product.reviews
            );
        }
    }

    prompt
}
