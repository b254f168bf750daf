mod build_test;
mod pipeline_test;
mod reload_test;
mod statics_test;
mod templates_test;
