// 该文件是 PPE Sentry （工地安全哨兵） 项目的一部分。
// src/narrative.rs - 事件报告正文生成
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::{report::SiteInfo, stats::UsageStats, violation::Violation};

const RULE_WIDTH: usize = 80;

#[derive(Error, Debug)]
pub enum NarrativeError {
  #[error("报告生成服务不可用: {0}")]
  Unavailable(String),
}

/// 生成报告所需的全部字段，已格式化为文本
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NarrativeRequest {
  pub report_id: String,
  /// 例如 `March 18, 2026`
  pub date: String,
  pub time: String,
  /// 十二小时制，例如 `02:25 PM`
  pub clock_time: String,
  pub site_name: String,
  pub site_location: String,
  pub company_name: String,
  /// 类别名转为标题格式，`no_helmet` -> `No Helmet`
  pub violation_type: String,
  pub description: String,
  /// 百分比，保留一位小数
  pub confidence: String,
  pub osha_regulation: String,
}

impl NarrativeRequest {
  pub fn for_violation(violation: &Violation, site: &SiteInfo) -> Self {
    let ts = violation.timestamp();
    Self {
      report_id: violation.report_id(),
      date: ts.format("%B %d, %Y").to_string(),
      time: ts.format("%H:%M:%S").to_string(),
      clock_time: ts.format("%I:%M %p").to_string(),
      site_name: site.site_name.clone(),
      site_location: site.site_location.clone(),
      company_name: site.company_name.clone(),
      violation_type: title_case(violation.class_name()),
      description: violation.description().to_string(),
      confidence: format!("{:.1}", violation.confidence() * 100.0),
      osha_regulation: violation.osha_regulation().to_string(),
    }
  }
}

fn title_case(class_name: &str) -> String {
  class_name
    .split('_')
    .filter(|w| !w.is_empty())
    .map(|w| {
      let mut chars = w.chars();
      match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
      }
    })
    .collect::<Vec<String>>()
    .join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Narrative {
  pub text: String,
  pub tokens_used: u64,
  /// 由离线模板生成
  pub fallback: bool,
}

/// 报告正文生成方，例如外部语言模型服务
pub trait NarrativeGenerator {
  fn generate(&mut self, request: &NarrativeRequest) -> Result<Narrative, NarrativeError>;
}

/// 离线模板报告（基础模式），不消耗 token
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateNarrative;

impl TemplateNarrative {
  pub fn render(&self, request: &NarrativeRequest) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    format!(
      "{rule}\n\
       SAFETY INCIDENT REPORT (BASIC MODE)\n\
       {rule}\n\
       \n\
       Report ID: {report_id}\n\
       Date: {date}\n\
       Time: {time}\n\
       Location: {location}\n\
       Site: {site}\n\
       \n\
       INCIDENT DESCRIPTION:\n\
       At {clock_time}, automated surveillance detected a {violation_type} violation.\n\
       Observation: {description}.\n\
       \n\
       OSHA REGULATION VIOLATED:\n\
       {regulation}\n\
       \n\
       DETECTION DETAILS:\n\
       Confidence Level: {confidence}%\n\
       Detection Method: Automated Vision System\n\
       \n\
       RECOMMENDED ACTIONS:\n\
       1. Immediate notification to site supervisor\n\
       2. Safety briefing for affected worker\n\
       3. Review of PPE compliance procedures\n\
       4. Additional monitoring of the area\n\
       \n\
       This is an automated basic report. Narrative generation was unavailable.\n\
       {rule}\n",
      report_id = request.report_id,
      date = request.date,
      time = request.time,
      location = request.site_location,
      site = request.site_name,
      clock_time = request.clock_time,
      violation_type = request.violation_type,
      description = request.description,
      regulation = request.osha_regulation,
      confidence = request.confidence,
    )
  }
}

impl NarrativeGenerator for TemplateNarrative {
  fn generate(&mut self, request: &NarrativeRequest) -> Result<Narrative, NarrativeError> {
    Ok(Narrative {
      text: self.render(request),
      tokens_used: 0,
      fallback: true,
    })
  }
}

/// 优先调用主生成方，失败时退回模板报告，并记录用量
#[derive(Default)]
pub struct NarrativeService {
  primary: Option<Box<dyn NarrativeGenerator>>,
  template: TemplateNarrative,
}

impl NarrativeService {
  pub fn new(primary: Option<Box<dyn NarrativeGenerator>>) -> Self {
    Self {
      primary,
      template: TemplateNarrative,
    }
  }

  pub fn has_primary(&self) -> bool {
    self.primary.is_some()
  }

  pub fn narrate(
    &mut self,
    violation: &Violation,
    site: &SiteInfo,
    stats: &mut UsageStats,
  ) -> Narrative {
    let request = NarrativeRequest::for_violation(violation, site);

    let narrative = match self.primary.as_mut().map(|g| g.generate(&request)) {
      Some(Ok(narrative)) if !narrative.text.trim().is_empty() => narrative,
      Some(Ok(_)) => {
        warn!("报告 {} 内容为空，使用基础模式", request.report_id);
        self.template_narrative(&request)
      }
      Some(Err(e)) => {
        warn!("报告 {} 生成失败，使用基础模式: {}", request.report_id, e);
        self.template_narrative(&request)
      }
      None => self.template_narrative(&request),
    };

    stats.record_narrative(narrative.tokens_used, narrative.fallback);
    narrative
  }

  fn template_narrative(&self, request: &NarrativeRequest) -> Narrative {
    Narrative {
      text: self.template.render(request),
      tokens_used: 0,
      fallback: true,
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::{TimeZone, Utc};

  use super::*;
  use crate::violation::{BBox, DetectionRecord, Severity};

  fn violation() -> Violation {
    Violation::new(
      DetectionRecord {
        class_id: 1,
        class_name: "no_helmet".into(),
        confidence: 0.876,
        bbox: BBox::new(0, 0, 10, 10).unwrap(),
      },
      "Worker without hard hat/helmet",
      "29 CFR 1926.100(a) - Head Protection",
      Severity::High,
      Utc.with_ymd_and_hms(2026, 3, 18, 14, 25, 1).unwrap(),
    )
  }

  struct Scripted(Result<Narrative, ()>);

  impl NarrativeGenerator for Scripted {
    fn generate(&mut self, _request: &NarrativeRequest) -> Result<Narrative, NarrativeError> {
      self
        .0
        .clone()
        .map_err(|_| NarrativeError::Unavailable("timeout".into()))
    }
  }

  #[test]
  fn request_formats_fields() {
    let request = NarrativeRequest::for_violation(&violation(), &SiteInfo::default());
    assert_eq!(request.report_id, "20260318-142501");
    assert_eq!(request.date, "March 18, 2026");
    assert_eq!(request.time, "14:25:01");
    assert_eq!(request.clock_time, "02:25 PM");
    assert_eq!(request.violation_type, "No Helmet");
    assert_eq!(request.confidence, "87.6");
    assert_eq!(title_case("no__GOGGLE"), "No Goggle");
  }

  #[test]
  fn template_report_mentions_regulation() {
    let mut stats = UsageStats::default();
    let narrative = NarrativeService::default().narrate(&violation(), &SiteInfo::default(), &mut stats);
    assert!(narrative.fallback);
    assert!(narrative.text.contains("BASIC MODE"));
    assert!(narrative.text.contains("29 CFR 1926.100(a) - Head Protection"));
    assert!(narrative.text.contains("Confidence Level: 87.6%"));
    assert_eq!(stats.narrative_fallbacks, 1);
  }

  #[test]
  fn primary_result_is_used_and_counted() {
    let mut service = NarrativeService::new(Some(Box::new(Scripted(Ok(Narrative {
      text: "formal report".into(),
      tokens_used: 420,
      fallback: false,
    })))));
    let mut stats = UsageStats::default();
    let narrative = service.narrate(&violation(), &SiteInfo::default(), &mut stats);

    assert_eq!(narrative.text, "formal report");
    assert_eq!(stats.narrative_tokens, 420);
    assert_eq!(stats.narrative_fallbacks, 0);
  }

  #[test]
  fn primary_failure_falls_back() {
    let mut service = NarrativeService::new(Some(Box::new(Scripted(Err(())))));
    let mut stats = UsageStats::default();
    let narrative = service.narrate(&violation(), &SiteInfo::default(), &mut stats);

    assert!(narrative.fallback);
    assert!(narrative.text.contains("BASIC MODE"));
    assert_eq!(stats.narratives_generated, 1);
    assert_eq!(stats.narrative_fallbacks, 1);
  }
}
