diesel::table! {
    customers (id) {
        id -> Integer,
        uuid -> Nullable<Text>,
        device_id -> Nullable<Text>,
        customer_name -> Text,
        city -> Text,
        contact_person -> Text,
        synced -> Nullable<Bool>,
        deleted -> Bool,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    pm_sessions (id) {
        id -> Integer,
        uuid -> Nullable<Text>,
        device_id -> Nullable<Text>,
        customer_id -> Integer,
        title -> Text,
        technician -> Text,
        session_date -> Timestamp,
        synced -> Nullable<Bool>,
        deleted -> Bool,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    cabinets (id) {
        id -> Integer,
        uuid -> Nullable<Text>,
        device_id -> Nullable<Text>,
        customer_id -> Integer,
        pm_session_id -> Integer,
        cabinet_name -> Text,
        location -> Text,
        synced -> Nullable<Bool>,
        deleted -> Bool,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    nodes (id) {
        id -> Integer,
        uuid -> Nullable<Text>,
        device_id -> Nullable<Text>,
        cabinet_id -> Integer,
        node_address -> Text,
        node_type -> Text,
        performance_index -> Nullable<Float>,
        synced -> Nullable<Bool>,
        deleted -> Bool,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    measurements (id) {
        id -> Integer,
        uuid -> Nullable<Text>,
        device_id -> Nullable<Text>,
        node_id -> Integer,
        label -> Text,
        value -> Float,
        unit -> Text,
        synced -> Nullable<Bool>,
        deleted -> Bool,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    sync_metadata (key) {
        key -> Text,
        value -> Text,
    }
}

diesel::table! {
    audit_log (id) {
        id -> Integer,
        actor -> Text,
        action_type -> Text,
        target -> Nullable<Text>,
        details -> Nullable<Text>,
        created_at -> Timestamp,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    customers,
    pm_sessions,
    cabinets,
    nodes,
    measurements,
);
