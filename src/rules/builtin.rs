//! Built-in deployment rule catalog.

use super::{ContentPattern, Rule, Trigger};

fn globs(patterns: &[&str]) -> Vec<String> {
    patterns.iter().map(|p| p.to_string()).collect()
}

fn checks(items: &[&str]) -> Vec<String> {
    items.iter().map(|c| c.to_string()).collect()
}

fn rule(id: &str, description: &str, trigger: Trigger, items: &[&str]) -> Rule {
    Rule {
        id: id.to_string(),
        description: description.to_string(),
        trigger,
        checks: checks(items),
    }
}

pub fn rules() -> Vec<Rule> {
    vec![
        rule(
            "env-vars",
            "Environment variables added, removed, or renamed",
            Trigger {
                paths: globs(&["**/.env*", "**/*.env", "**/*.env.example"]),
                content: vec![
                    ContentPattern::new(r"process\.env\.[A-Za-z_]"),
                    ContentPattern::new(r"os\.environ|os\.getenv\("),
                    ContentPattern::new(r"std::env::var|env::var\("),
                    ContentPattern::new(r#"ENV\[['"]|ENV\.fetch"#),
                    ContentPattern::new(r"System\.getenv\("),
                ],
                ..Default::default()
            },
            &[
                "Every new variable is set in each deployed environment before release",
                "Removed or renamed variables are not still read by running services",
                "Secrets are stored in the secret manager, not in plain config",
                "Example env files and documentation list the new variables",
            ],
        ),
        rule(
            "migration-review",
            "Database migrations included in the change",
            Trigger {
                paths: globs(&[
                    "migrations/**",
                    "**/migrations/**",
                    "**/db/migrate/**",
                    "**/alembic/versions/**",
                    "**/*.sql",
                ]),
                ..Default::default()
            },
            &[
                "Migration is backward compatible with the currently deployed code",
                "Long-running locks on large tables are avoided or scheduled",
                "A rollback or down migration exists and has been exercised",
                "Migration ordering relative to the deploy is documented",
            ],
        ),
        rule(
            "schema-without-migration",
            "Data model changed without an accompanying migration",
            Trigger {
                paths: globs(&[
                    "**/models/**",
                    "**/models.py",
                    "**/entities/**",
                    "**/*.prisma",
                    "**/schema.rb",
                ]),
                companions: globs(&[
                    "migrations/**",
                    "**/migrations/**",
                    "**/db/migrate/**",
                    "**/alembic/versions/**",
                ]),
                ..Default::default()
            },
            &[
                "Confirm the model change needs no schema migration",
                "If a migration is needed, generate and commit it with this change",
            ],
        ),
        rule(
            "docker",
            "Container images and compose definitions",
            Trigger {
                paths: globs(&[
                    "**/Dockerfile*",
                    "**/*.dockerfile",
                    "**/docker-compose*.yml",
                    "**/docker-compose*.yaml",
                    "**/compose.yaml",
                    "**/.dockerignore",
                ]),
                include_full_files: true,
                ..Default::default()
            },
            &[
                "Base images are pinned to a specific version or digest",
                "The image builds and starts in CI",
                "No secrets are baked into image layers",
                "Exposed ports and health checks match the orchestrator configuration",
            ],
        ),
        rule(
            "ci-cd",
            "Continuous integration and delivery pipelines",
            Trigger {
                paths: globs(&[
                    ".github/workflows/**",
                    ".github/actions/**",
                    ".gitlab-ci.yml",
                    ".circleci/**",
                    "**/Jenkinsfile",
                    "**/azure-pipelines.yml",
                    ".buildkite/**",
                ]),
                include_full_files: true,
                ..Default::default()
            },
            &[
                "Pipeline changes were exercised on a branch before merging",
                "Third-party actions are pinned to a version or commit",
                "Deployment jobs still require the expected approvals",
                "Secrets used by the pipeline exist in the CI settings",
            ],
        ),
        rule(
            "dependencies",
            "Dependency manifests and lockfiles",
            Trigger {
                paths: globs(&[
                    "**/package.json",
                    "**/package-lock.json",
                    "**/yarn.lock",
                    "**/pnpm-lock.yaml",
                    "**/Cargo.toml",
                    "**/Cargo.lock",
                    "**/go.mod",
                    "**/go.sum",
                    "**/requirements*.txt",
                    "**/pyproject.toml",
                    "**/poetry.lock",
                    "**/Gemfile",
                    "**/Gemfile.lock",
                    "**/pom.xml",
                    "**/build.gradle*",
                ]),
                ..Default::default()
            },
            &[
                "Lockfile is updated together with the manifest",
                "Major version bumps were checked for breaking changes",
                "New packages were reviewed for license and maintenance status",
            ],
        ),
        rule(
            "infrastructure",
            "Infrastructure as code and cluster manifests",
            Trigger {
                paths: globs(&[
                    "**/*.tf",
                    "**/*.tfvars",
                    "**/k8s/**",
                    "**/kubernetes/**",
                    "**/helm/**",
                    "**/charts/**",
                    "**/serverless.yml",
                    "**/cdk/**",
                    "**/pulumi/**",
                ]),
                ..Default::default()
            },
            &[
                "A plan or diff of the infrastructure change was reviewed",
                "Resource deletions or replacements are intentional",
                "Resource limits and scaling settings are appropriate",
            ],
        ),
        rule(
            "secrets",
            "Possible credentials or key material in the diff",
            Trigger {
                content: vec![
                    ContentPattern::case_insensitive(
                        r#"(api[_-]?key|secret|passwd|password|access[_-]?token)\s*[:=]\s*['"][^'"]{8,}"#,
                    ),
                    ContentPattern::new(r"-----BEGIN [A-Z ]*PRIVATE KEY-----"),
                    ContentPattern::new(r"AKIA[0-9A-Z]{16}"),
                ],
                ..Default::default()
            },
            &[
                "No real credentials are committed; rotate any that were",
                "Secrets are loaded from the secret manager at runtime",
            ],
        ),
        rule(
            "feature-flags",
            "Feature flag definitions or checks",
            Trigger {
                content: vec![
                    ContentPattern::case_insensitive(r"feature[_-]?flag"),
                    ContentPattern::case_insensitive(r"launchdarkly|unleash|flagsmith|growthbook"),
                    ContentPattern::new(r"isEnabled\(|is_enabled\("),
                ],
                ..Default::default()
            },
            &[
                "Flag defaults are safe for every environment",
                "The flag exists in the flag service before the deploy",
                "A cleanup task exists for flags that will be removed",
            ],
        ),
        rule(
            "api-contract",
            "Public API definitions and routes",
            Trigger {
                paths: globs(&[
                    "**/openapi*.{yml,yaml,json}",
                    "**/swagger*.{yml,yaml,json}",
                    "**/*.proto",
                    "**/*.graphql",
                    "**/routes/**",
                    "**/api/**",
                ]),
                ..Default::default()
            },
            &[
                "Changes are backward compatible for existing clients",
                "Removed or renamed fields went through a deprecation period",
                "API documentation and client SDKs are updated",
            ],
        ),
        rule(
            "auth-security",
            "Authentication, authorization, and request security",
            Trigger {
                paths: globs(&["**/auth/**", "**/middleware/**", "**/permissions/**"]),
                content: vec![ContentPattern::case_insensitive(
                    r"\b(cors|csrf|jwt|oauth|bcrypt|session_secret)\b",
                )],
                ..Default::default()
            },
            &[
                "Access control still denies unauthenticated requests",
                "Token lifetimes and signing keys are unchanged or rotated safely",
                "CORS and CSRF settings are not widened unintentionally",
            ],
        ),
        rule(
            "config-files",
            "Application configuration files",
            Trigger {
                paths: globs(&[
                    "**/config/**",
                    "**/*.config.{js,ts,mjs,cjs}",
                    "**/settings.py",
                    "**/application*.{yml,yaml,properties}",
                    "**/appsettings*.json",
                ]),
                ..Default::default()
            },
            &[
                "Every environment-specific override was updated",
                "Configuration defaults are safe for production",
            ],
        ),
        rule(
            "background-jobs",
            "Scheduled tasks, queues, and workers",
            Trigger {
                paths: globs(&["**/jobs/**", "**/workers/**", "**/cron/**", "**/queues/**"]),
                content: vec![
                    ContentPattern::new(r"@Scheduled|cron\(|schedule\.every"),
                    ContentPattern::case_insensitive(r"\b(sidekiq|celery|bullmq)\b"),
                ],
                ..Default::default()
            },
            &[
                "Jobs already enqueued in the old format are still processed",
                "Schedules do not overlap with maintenance windows",
                "Worker concurrency and retry settings are appropriate",
            ],
        ),
        rule(
            "caching",
            "Cache usage and invalidation",
            Trigger {
                content: vec![
                    ContentPattern::case_insensitive(r"\b(redis|memcached?)\b"),
                    ContentPattern::new(r"cache\.(set|get|delete|invalidate)\("),
                ],
                ..Default::default()
            },
            &[
                "Cached data written by the old version is still readable or invalidated",
                "Cache keys are versioned when the stored shape changes",
            ],
        ),
    ]
}
