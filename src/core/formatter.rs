use std::sync::Arc;
use tracing::debug;

use crate::infra::llm::{GenerateRequest, LlmError, LlmProvider};

const FORMAT_GUIDE: &str = r#"Your task: reformat this into a clear, conversational, user-friendly response.

Guidelines:
- If the result looks like structured tabular data (list of objects), return it as a markdown table.
- If it is a single value, explain it naturally in one sentence.
- If it is unstructured text, return a clean, short answer.
- If the user asked a question before uploading any file, politely say: "Please upload a file first to answer this query."
- If the result is an error, apologise briefly and say what went wrong without technical detail.
- Avoid exposing raw JSON or SQL.

# Examples:

User: "What is the shipping status of order 1001?"
Raw Result: [{"Shipping Status": "Delivered"}]
Answer: The shipping status of order **1001** is **Delivered**.

---

User: "Show me total price and sale date from sales details"
Raw Result: [{"Sale Date": "2025-07-01", "Total Price": 500}, {"Sale Date": "2025-07-02", "Total Price": 700}]
Answer: Here are the sales details:

| Sale Date   | Total Price |
|-------------|-------------|
| 2025-07-01  | 500         |
| 2025-07-02  | 700         |

---

User: "Give me a summary of priya sharma's purchase"
Raw Result: [{"Order ID": "ORD100", "Product Name": "Wireless Mouse", "Quantity": 2, "Total Price": 1000, "Sale Date": "2025-07-04 00:00:00"}]
Answer: Priya Sharma ordered a Wireless Mouse on 2025-07-04. She ordered 2 of them for a total price of 1000, and the order id is ORD100.

---

User: "Tell me about the refund policy"
Raw Result: "Our refund policy allows returns within 30 days."
Answer: Our refund policy allows returns **within 30 days**.

---

User: "Can you calculate profit margin?"
Raw Result: "Please upload a file first."
Answer: Please upload a file first to answer queries about data.

---

Now, reformat the given raw result for this query accordingly:"#;

/// 把原始结果交给模型改写成自然语言
pub struct ResponseFormatter {
    llm: Arc<dyn LlmProvider>,
}

impl ResponseFormatter {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    pub fn build_prompt(user_query: &str, raw_result: &str) -> String {
        format!(
            "The user asked: {}\nThe raw function result is: {}\n\n{}",
            user_query, raw_result, FORMAT_GUIDE
        )
    }

    pub async fn format(&self, user_query: &str, raw_result: &str) -> Result<String, LlmError> {
        debug!("原始结果: {}", raw_result);
        let reply = self
            .llm
            .generate(GenerateRequest::text(Self::build_prompt(user_query, raw_result)))
            .await?;
        match reply.text {
            Some(text) if !text.trim().is_empty() => Ok(text.trim().to_string()),
            _ => Err(LlmError::Malformed("formatter returned no text".to_string())),
        }
    }
}
