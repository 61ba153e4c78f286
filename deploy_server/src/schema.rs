//! Diesel table definitions.
//!
//! Tables: webhooks, deployment_events, system_metrics.

diesel::table! {
    webhooks (id) {
        id -> Int8,
        name -> Varchar,
        domain -> Nullable<Varchar>,
        git_provider -> Varchar,
        repository_url -> Varchar,
        branch -> Nullable<Varchar>,
        local_path -> Varchar,
        deploy_user -> Nullable<Varchar>,
        secret_token -> Varchar,
        pre_deploy_script -> Nullable<Text>,
        post_deploy_script -> Nullable<Text>,
        ssh_key_path -> Nullable<Varchar>,
        is_active -> Bool,
        last_deployed_at -> Nullable<Timestamptz>,
        last_outcome -> Nullable<Varchar>,
        create_date -> Timestamptz,
        write_date -> Timestamptz,
    }
}

diesel::table! {
    deployment_events (id) {
        id -> Int8,
        webhook_id -> Int8,
        event_type -> Varchar,
        branch -> Nullable<Varchar>,
        branch_matched -> Bool,
        commit_sha -> Nullable<Varchar>,
        verification -> Varchar,
        outcome -> Varchar,
        reason -> Nullable<Varchar>,
        output -> Nullable<Text>,
        error -> Nullable<Text>,
        duration_ms -> Nullable<Int4>,
        received_at -> Timestamptz,
        recorded_at -> Timestamptz,
    }
}

diesel::table! {
    system_metrics (id) {
        id -> Int8,
        cpu_usage -> Nullable<Float8>,
        memory_usage -> Nullable<Float8>,
        disk_usage -> Nullable<Float8>,
        memory_total -> Nullable<Int8>,
        memory_used -> Nullable<Int8>,
        disk_total -> Nullable<Int8>,
        disk_used -> Nullable<Int8>,
        disk_read_bytes -> Nullable<Int8>,
        disk_write_bytes -> Nullable<Int8>,
        network_rx_bytes -> Nullable<Int8>,
        network_tx_bytes -> Nullable<Int8>,
        recorded_at -> Timestamptz,
    }
}

diesel::joinable!(deployment_events -> webhooks (webhook_id));

diesel::allow_tables_to_appear_in_same_query!(webhooks, deployment_events, system_metrics);
