pub(crate) mod validated_query;
