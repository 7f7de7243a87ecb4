//! JS 执行器 - 基础设施层
//!
//! 持有一个渲染好的题目页面，只暴露"执行 JS"的能力

use anyhow::Result;
use chromiumoxide::Page;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

/// JS 执行器
///
/// 职责：
/// - 持有一次抓取使用的 Page
/// - 暴露 eval() 能力
/// - 不认识题目内容，不处理流程
pub struct JsExecutor {
    page: Page,
}

impl JsExecutor {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    /// 执行 JS 代码并返回 JSON 结果
    pub async fn eval(&self, js_code: impl Into<String>) -> Result<JsonValue> {
        let result = self.page.evaluate(js_code.into()).await?;
        let json_value = result.into_value()?;
        Ok(json_value)
    }

    /// 执行 JS 代码并反序列化为指定类型
    pub async fn eval_as<T: DeserializeOwned>(&self, js_code: impl Into<String>) -> Result<T> {
        let json_value = self.eval(js_code).await?;
        let typed_value = serde_json::from_value(json_value)?;
        Ok(typed_value)
    }

    /// 关闭页面
    pub async fn close(self) -> Result<()> {
        self.page.close().await?;
        Ok(())
    }
}
