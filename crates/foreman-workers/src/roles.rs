use serde::{Deserialize, Serialize};

/// Domain specialization of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerRole {
    /// Delegates to, and aggregates results from, other workers.
    Boss,
    /// Campaigns and content.
    Marketing,
    /// Payments and invoices.
    Finance,
    /// Visual and UX design.
    Design,
    /// Code and APIs.
    Engineering,
    /// Support tickets.
    CustomerService,
    /// Analytics and ETL.
    Data,
    /// Scanning and access control.
    Security,
    /// Deployment and infrastructure.
    Devops,
    /// Model training and serving.
    Ml,
}

/// Capability that marks a worker as the coordinator.
pub const COORDINATOR_CAPABILITY: &str = "task_delegation";

impl WorkerRole {
    /// Every role, coordinator first.
    pub const ALL: [WorkerRole; 10] = [
        WorkerRole::Boss,
        WorkerRole::Marketing,
        WorkerRole::Finance,
        WorkerRole::Design,
        WorkerRole::Engineering,
        WorkerRole::CustomerService,
        WorkerRole::Data,
        WorkerRole::Security,
        WorkerRole::Devops,
        WorkerRole::Ml,
    ];

    /// Capabilities a worker of this role declares by default.
    pub fn default_capabilities(&self) -> &'static [&'static str] {
        match self {
            WorkerRole::Boss => &[
                COORDINATOR_CAPABILITY,
                "agent_coordination",
                "workflow_management",
                "result_aggregation",
            ],
            WorkerRole::Marketing => &[
                "campaign_creation",
                "content_generation",
                "social_media_management",
                "email_marketing",
                "seo_optimization",
                "analytics_reporting",
                "ab_testing",
                "audience_analysis",
                "competitor_analysis",
                "brand_development",
            ],
            WorkerRole::Finance => &[
                "payment_processing",
                "invoice_generation",
                "financial_analysis",
                "tax_calculations",
                "payment_tracking",
                "financial_reporting",
            ],
            WorkerRole::Design => &[
                "ui_design",
                "ux_design",
                "logo_creation",
                "color_palette",
                "typography",
                "responsive_design",
                "design_templates",
                "brand_guidelines",
            ],
            WorkerRole::Engineering => &[
                "code_generation",
                "api_development",
                "database_design",
                "testing_automation",
                "deployment_automation",
                "code_review",
                "documentation_generation",
                "performance_optimization",
            ],
            WorkerRole::CustomerService => &[
                "ticket_management",
                "customer_support",
                "sentiment_analysis",
                "response_generation",
                "escalation_management",
                "knowledge_base_search",
                "chat_support",
                "feedback_analysis",
            ],
            WorkerRole::Data => &[
                "data_processing",
                "analytics",
                "data_visualization",
                "etl_operations",
                "data_quality_checks",
                "reporting",
            ],
            WorkerRole::Security => &[
                "vulnerability_scanning",
                "access_control",
                "encryption",
                "audit_logging",
                "compliance_checking",
                "threat_detection",
            ],
            WorkerRole::Devops => &[
                "container_management",
                "deployment_automation",
                "infrastructure_monitoring",
                "ci_cd_pipeline",
                "environment_management",
                "backup_management",
            ],
            WorkerRole::Ml => &[
                "model_training",
                "model_deployment",
                "prediction_service",
                "model_evaluation",
                "data_preprocessing",
                "feature_engineering",
                "probability_estimates",
            ],
        }
    }

    /// Task kinds a worker of this role accepts.
    pub fn task_kinds(&self) -> Vec<TaskKind> {
        TaskKind::ALL
            .iter()
            .copied()
            .filter(|k| k.role() == *self)
            .collect()
    }
}

impl std::fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerRole::Boss => "boss",
            WorkerRole::Marketing => "marketing",
            WorkerRole::Finance => "finance",
            WorkerRole::Design => "design",
            WorkerRole::Engineering => "engineering",
            WorkerRole::CustomerService => "customer_service",
            WorkerRole::Data => "data",
            WorkerRole::Security => "security",
            WorkerRole::Devops => "devops",
            WorkerRole::Ml => "ml",
        };
        f.write_str(s)
    }
}

macro_rules! task_kinds {
    ($($role:ident => { $($variant:ident = $name:literal),+ $(,)? }),+ $(,)?) => {
        /// Closed set of task kinds, grouped by the role that handles them.
        ///
        /// A task's free-form `task_type` string is parsed into one of these at
        /// the worker boundary.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum TaskKind {
            $($(
                #[doc = concat!("`", $name, "`, handled by the ", stringify!($role), " role.")]
                $variant,
            )+)+
        }

        impl TaskKind {
            /// Every task kind.
            pub const ALL: &'static [TaskKind] = &[$($(TaskKind::$variant,)+)+];

            /// Wire name of the kind.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($(TaskKind::$variant => $name,)+)+
                }
            }

            /// Role that handles this kind.
            pub fn role(&self) -> WorkerRole {
                match self {
                    $($(TaskKind::$variant => WorkerRole::$role,)+)+
                }
            }
        }
    };
}

task_kinds! {
    Boss => {
        Delegate = "delegate",
        Coordinate = "coordinate",
        Aggregate = "aggregate",
    },
    Marketing => {
        CreateCampaign = "create_campaign",
        GenerateContent = "generate_content",
        SocialMediaPost = "social_media_post",
        EmailCampaign = "email_campaign",
        SeoContent = "seo_content",
        AnalyzeAudience = "analyze_audience",
        CompetitorAnalysis = "competitor_analysis",
        BrandStrategy = "brand_strategy",
    },
    Finance => {
        ProcessPayment = "process_payment",
        GenerateInvoice = "generate_invoice",
        CalculateTaxes = "calculate_taxes",
        FinancialReport = "financial_report",
    },
    Design => {
        CreateDesign = "create_design",
        GeneratePalette = "generate_palette",
        DesignLogo = "design_logo",
        CreateTemplate = "create_template",
    },
    Engineering => {
        GenerateCode = "generate_code",
        CreateApi = "create_api",
        ReviewCode = "review_code",
        GenerateDocumentation = "generate_documentation",
        CreateTests = "create_tests",
    },
    CustomerService => {
        HandleTicket = "handle_ticket",
        AnalyzeSentiment = "analyze_sentiment",
        GenerateResponse = "generate_response",
        SearchKnowledgeBase = "search_knowledge_base",
    },
    Data => {
        AnalyzeData = "analyze_data",
        GenerateReport = "generate_report",
        DataQualityCheck = "data_quality_check",
        EtlProcess = "etl_process",
        CreateVisualization = "create_visualization",
    },
    Security => {
        VulnerabilityScan = "vulnerability_scan",
        GenerateToken = "generate_token",
        EncryptData = "encrypt_data",
        AuditCheck = "audit_check",
        ComplianceReport = "compliance_report",
        ThreatAnalysis = "threat_analysis",
    },
    Devops => {
        DeployApplication = "deploy_application",
        ManageContainers = "manage_containers",
        SetupCiCd = "setup_ci_cd",
        MonitorInfrastructure = "monitor_infrastructure",
        BackupData = "backup_data",
        ScaleServices = "scale_services",
    },
    Ml => {
        TrainModel = "train_model",
        MakePrediction = "make_prediction",
        EvaluateModel = "evaluate_model",
        DeployModel = "deploy_model",
        PreprocessData = "preprocess_data",
        FeatureEngineering = "feature_engineering",
    },
}

impl TaskKind {
    /// Parse `name` as a kind handled by `role`.
    pub fn parse_for(role: WorkerRole, name: &str) -> Option<TaskKind> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.role() == role && k.as_str() == name)
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_role_display() {
        assert_eq!(WorkerRole::CustomerService.to_string(), "customer_service");
        assert_eq!(WorkerRole::Boss.to_string(), "boss");
    }

    #[test]
    fn test_every_role_has_capabilities_and_kinds() {
        for role in WorkerRole::ALL {
            assert!(!role.default_capabilities().is_empty(), "{role} has no capabilities");
            assert!(!role.task_kinds().is_empty(), "{role} has no task kinds");
        }
    }

    #[test]
    fn test_boss_declares_coordinator_capability() {
        assert!(WorkerRole::Boss
            .default_capabilities()
            .contains(&COORDINATOR_CAPABILITY));
        assert!(!WorkerRole::Finance
            .default_capabilities()
            .contains(&COORDINATOR_CAPABILITY));
    }

    #[test]
    fn test_parse_for_role() {
        assert_eq!(
            TaskKind::parse_for(WorkerRole::Finance, "generate_invoice"),
            Some(TaskKind::GenerateInvoice)
        );
        // Right name, wrong role.
        assert_eq!(TaskKind::parse_for(WorkerRole::Design, "generate_invoice"), None);
        assert_eq!(TaskKind::parse_for(WorkerRole::Finance, "nope"), None);
    }

    #[test]
    fn test_kind_serde_matches_wire_name() {
        for kind in TaskKind::ALL {
            let json = serde_json::to_string(kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_ml_declares_optional_probability_operation() {
        assert!(WorkerRole::Ml
            .default_capabilities()
            .contains(&"probability_estimates"));
    }
}
