// Diesel table definitions, kept in sync with `DbContext::init_schema`.

diesel::table! {
    works (id) {
        id -> BigInt,
        title -> Text,
        genre -> Text,
        region -> Text,
        year -> Text,
        actors -> Text,
        directors -> Text,
        synopsis -> Text,
        url -> Text,
        last_seen -> Text,
    }
}

diesel::table! {
    episodes (work_id, episode) {
        work_id -> BigInt,
        episode -> Integer,
        name -> Text,
        play_url -> Text,
        media_url -> Nullable<Text>,
        last_seen -> Text,
    }
}

diesel::table! {
    category_progress (category) {
        category -> Integer,
        current_page -> Integer,
        total_pages -> Integer,
        last_work_id -> Nullable<BigInt>,
        status -> Text,
        updated_at -> Text,
    }
}

diesel::joinable!(episodes -> works (work_id));

diesel::allow_tables_to_appear_in_same_query!(works, episodes, category_progress,);
