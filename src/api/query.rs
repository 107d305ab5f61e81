use axum::{extract::State, http::HeaderMap, Form, Json};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::api::error::ApiError;
use crate::api::session_id;
use crate::ax_state::AppState;
use crate::core::dispatcher::RawArgs;
use crate::core::intent::RoutingDecision;
use crate::models::context::QueryForm;

pub const NO_FUNCTION_MESSAGE: &str = "Sorry, no relevant function was triggered by the query.";

/// 路由 -> 分发 -> 格式化
pub async fn handle_query(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(form): Form<QueryForm>,
) -> Result<Json<Value>, ApiError> {
    let session_id = session_id(&headers);
    let session = state.sessions.snapshot(&session_id);
    let query = form.query.trim();
    info!("收到查询 [{}]: {}", session_id, query);

    let tables = state.store.describe_tables().await.unwrap_or_else(|e| {
        warn!("读取表结构失败: {}", e);
        vec![]
    });

    let Some(decision) = state.router.route(query, &tables, &session).await else {
        return Ok(Json(json!({ "response": NO_FUNCTION_MESSAGE })));
    };

    let raw_result = match decision {
        RoutingDecision::Call(call) => state
            .dispatcher
            .dispatch(&call.name, RawArgs::from_value(call.args), &session)
            .await
            .to_prompt_text(),
        RoutingDecision::Answer(text) => text,
    };
    info!("原始结果: {}", raw_result);

    let formatted = state
        .formatter
        .format(query, &raw_result)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({ "response": formatted })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::test_state;
    use crate::infra::llm::{FunctionCall, LlmReply};
    use crate::infra::loader::parse_csv;
    use crate::infra::testing::FakeLlm;
    use crate::models::context::FileKind;

    fn form(query: &str) -> Form<QueryForm> {
        Form(QueryForm {
            query: query.to_string(),
        })
    }

    #[tokio::test]
    async fn unrouted_query_gets_apology() {
        let llm = Arc::new(FakeLlm::new(vec![FakeLlm::text(r#"{"unexpected": true}"#)]));
        let (_dir, state) = test_state(llm);
        let Json(body) = handle_query(State(state), HeaderMap::new(), form("hello"))
            .await
            .unwrap();
        assert_eq!(body, json!({ "response": NO_FUNCTION_MESSAGE }));
    }

    #[tokio::test]
    async fn tabular_query_runs_and_is_formatted() {
        let call = LlmReply {
            function_call: Some(FunctionCall {
                name: "get_order_details".into(),
                args: json!({
                    "aggregations": [{ "operation": "SUM", "column": "Total Price" }],
                    "group_by": ["Category"]
                }),
            }),
            text: None,
        };
        let llm = Arc::new(FakeLlm::new(vec![Some(call), FakeLlm::text("Here are the totals.")]));
        let (_dir, state) = test_state(llm.clone());

        let table = parse_csv("Category,Total Price\nA,10\nB,5\nA,7\n", "sales").unwrap();
        state.store.replace_table(&table).await.unwrap();
        state
            .sessions
            .record_upload("default", Some("sales".into()), FileKind::Csv);

        let Json(body) = handle_query(State(state), HeaderMap::new(), form("totals per category"))
            .await
            .unwrap();
        assert_eq!(body, json!({ "response": "Here are the totals." }));

        let format_prompt = llm.last_prompt().unwrap();
        assert!(format_prompt.contains(
            r#"The raw function result is: [{"SUM(\"Total Price\")":17},{"SUM(\"Total Price\")":5}]"#
        ));
    }

    #[tokio::test]
    async fn prose_answer_is_formatted_directly() {
        let llm = Arc::new(FakeLlm::new(vec![
            FakeLlm::text("I can help with your uploaded data."),
            FakeLlm::text("I can help with your uploaded data!"),
        ]));
        let (_dir, state) = test_state(llm.clone());
        let Json(body) = handle_query(State(state), HeaderMap::new(), form("hi"))
            .await
            .unwrap();
        assert_eq!(body["response"], "I can help with your uploaded data!");
        assert!(llm
            .last_prompt()
            .unwrap()
            .contains("The raw function result is: I can help with your uploaded data."));
    }

    #[tokio::test]
    async fn formatter_failure_is_internal_error() {
        let llm = Arc::new(FakeLlm::new(vec![
            FakeLlm::text(r#"{"name": "handle_unknown_query", "arguments": {}}"#),
            None,
        ]));
        let (_dir, state) = test_state(llm);
        let result = handle_query(State(state), HeaderMap::new(), form("???")).await;
        assert!(matches!(result, Err(ApiError::Internal(_))));
    }
}
