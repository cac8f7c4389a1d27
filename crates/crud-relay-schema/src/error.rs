/// Validation errors for inbound queries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
   /// The query named no model type.
   #[error("query has no model type")]
   MissingModelType,

   /// The model type is not declared in the schema.
   #[error("unknown model type '{0}'")]
   UnknownModel(String),

   /// The named view does not exist under the model.
   #[error("unknown view '{view}' for model type '{model}'")]
   UnknownView { model: String, view: String },

   /// A field query arrived without an id.
   #[error("field queries require an id")]
   FieldWithoutId,

   /// A view query arrived without parameter values.
   #[error("view query for '{view}' is missing viewParams")]
   MissingViewParams { view: String },

   /// A required view parameter is absent.
   #[error("viewParams for '{view}' is missing required field '{field}'")]
   MissingViewParam { view: String, field: String },
}
