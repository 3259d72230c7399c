//! Prompt templates for the workflow roles

/// Query judge: answers `good` or `bad`
pub fn judge_query(query: &str) -> String {
    format!(
        "Given a user query, determine if this is likely to yield good results from a RAG system as-is. \
If it's good, return 'good', if it's bad, return 'bad'.
Good queries use a lot of relevant keywords and are detailed. Bad queries are vague or ambiguous.

Here is the query: {query}

Don't provide any additional input, metadata, markdown or preamble."
    )
}

pub fn improve_query(query: &str) -> String {
    format!(
        "This is a query to a RAG system: {query}

The query is bad because it is too vague. Please provide a more detailed query that includes specific \
keywords and removes any ambiguity. Don't add any new meaning which the query does not already contain. \
Only expand the original meaning of the query. If the words are not meaningful, don't try to interpret \
or correct the words.

Return only the final query and nothing else.
Don't provide any additional input, metadata, markdown or preamble."
    )
}

pub fn build_context(history: &str, query: &str) -> String {
    format!(
        "Given a user's query and the conversation (between user and assistant), create context based on \
relevant parts of conversation history. This context will be used to answer the user's query.

Add all the data, contextual information and clues to the context.
Don't create more questions and adapt everything into just contextual information.
Don't try to answer the query either.
----------------------------------
{history}
----------------------------------

User's Question: {query}

Return only the created context and nothing else."
    )
}

/// Response judge: first line is `correct`, `retry` or `failure`
pub fn judge_response(original_query: &str, intermediate: &[String], latest: &str) -> String {
    let process = intermediate.join("\n");
    format!(
        "A user had provided a query and a response was generated.
The response was generated from verified sources.
Assume the response to be factual and true, without any shred of fabrication.
Your job is to judge the response relative to the query.

User query: {original_query}.

The process was:
{process}

The final response was: {latest}.

Take the user's query at face value.
Does the response clearly answer the user's question?
Are there any parts of the user's query which are unanswered by the response?
If all parts of the user's query can be said to be answered by the response,
then it is correct, return 'correct'.

If the response is judged as not correct only then:
Does the response provoke more potential questions?
Can the question be expanded using the answer to get more details?
If the response has any unanswered segments which should also be answered,
return 'retry'.

If the response provides a lot of context or information but still fails to answer the query,
then it is also possible that the query cannot be answered and retrying is useless.
If the response cannot answer the user's query even after further revisions or expansions,
return 'failure'.

Review the response in order, first check if it is correct, and so on.
Move on to the next step only if the previous step is false.
Also explain the reason behind your choice, step by step in order.

In the first line your choice, and the reason from the second line.
For example:

correct
correct: <reason why it is correct>

retry
not correct: <reason why it is not correct>
retry: <reason why retry will work>

failure
not correct: <reason why it is not correct>
not retry: <reason why retry will not work>
failure: <reason why it is considered a failure>

Don't provide any additional input, metadata, markdown or preamble."
    )
}

/// First re-query step: a new query for the unanswered remainder
pub fn requery_new(original_query: &str, query: &str, answer: &str) -> String {
    format!(
        "A user had provided a query and an answer was generated.
The answer was judged as incorrect. Your job is to create a new query which can help answer the original query.

The original query was: {original_query}.
The current query was: {query}.
The current answer was: {answer}.

Please use the previous queries and see which parts of it are still unanswered. \
Generate a new query to completely answer the original query.

Return only the new query and nothing else.
Don't provide any additional input, metadata, markdown or preamble."
    )
}

/// Second re-query step: fold the previous exchange into the new query
pub fn requery_rewrite(original_query: &str, query: &str, answer: &str, new_query: &str) -> String {
    format!(
        "A user had provided a query and an answer was generated.
The answer was judged as incorrect, and the query was revised.
Your job is to combine all the previous data with the new query.

The original query was: {original_query}.
The previous query was: {query}.
The previous answer was: {answer}.

The new query is: {new_query}

Convert all the previous data to contextual information and clues, and rewrite the new query \
incorporating all this information in it. Don't change the meaning of the new query, and don't add \
any new questions either. Keep the meaning of the new query, but add more context.

Return only the final revised new query and nothing else.
Don't provide any additional input, metadata, markdown or preamble."
    )
}

pub fn answer(query: &str, answer: &str, original_query: &str) -> String {
    format!(
        "Context information is below.
---------------------
{query}
{answer}
---------------------
Given the context information and not prior knowledge, answer the query.
Query: {original_query}"
    )
}
